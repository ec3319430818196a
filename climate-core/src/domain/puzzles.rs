//! Serialized puzzle templates and the curry/uncurry plumbing shared by the
//! tail and gateway modules.
//!
//! The gateway puzzle takes a single solution argument, the condition list,
//! and emits it verbatim. All authority is carried by the conditions (the
//! melt-sentinel reveal plus the signature bindings), not by the puzzle body,
//! which keeps the on-chain footprint of every mode identical.

use chia_protocol::Bytes32;
use chia_puzzles::{CAT_PUZZLE, CAT_PUZZLE_HASH};
use clvm_utils::{curry_tree_hash, tree_hash_atom, TreeHash};
use clvmr::{Allocator, NodePtr};

use crate::foundation::clvm::{alloc_atom, alloc_list, as_atom, as_pair, bytes_to_node, tree_hash32, ClvmError};

/// `(f 1)` -- return the first solution argument, the condition list.
pub const GATEWAY_PUZZLE: &[u8] = &[0xff, 0x05, 0xff, 0x01, 0x80];

/// `(a 11 23)` -- run the delegated puzzle carried in the tail solution
/// against its delegated solution.
pub const DELEGATED_TAIL: &[u8] = &[0xff, 0x02, 0xff, 0x0b, 0xff, 0x17, 0x80];

/// Delegated puzzle for issuance: binds a signature from the curried mode key
/// over the first delegated-solution argument.
pub const MINT_WITH_SIGNATURE: &[u8] = &[
    0xff, 0x04, 0xff, 0xff, 0x04, 0xff, 0xff, 0x01, 0x32, 0xff, 0xff, 0x04, 0xff, 0x02, 0xff, 0xff, 0x04, 0xff,
    0x05, 0xff, 0x80, 0x80, 0x80, 0x80, 0xff, 0x80, 0x80,
];

/// Delegated puzzle for supervised melt: as above, over the second argument.
pub const MELT_ALL_WITH_SIGNATURE: &[u8] = &[
    0xff, 0x04, 0xff, 0xff, 0x04, 0xff, 0xff, 0x01, 0x32, 0xff, 0xff, 0x04, 0xff, 0x02, 0xff, 0xff, 0x04, 0xff,
    0x0b, 0xff, 0x80, 0x80, 0x80, 0x80, 0xff, 0x80, 0x80,
];

/// `(q)` -- no conditions, so any holder may melt.
pub const MELT_ALL_BY_ANYONE: &[u8] = &[0xff, 0x01, 0x80];

const OP_QUOTE: &[u8] = &[1];
const OP_APPLY: &[u8] = &[2];
const OP_CONS: &[u8] = &[4];

pub fn gateway_node(a: &mut Allocator) -> Result<NodePtr, ClvmError> {
    bytes_to_node(a, GATEWAY_PUZZLE)
}

pub fn delegated_tail_node(a: &mut Allocator) -> Result<NodePtr, ClvmError> {
    bytes_to_node(a, DELEGATED_TAIL)
}

pub fn gateway_puzzle_hash() -> Bytes32 {
    template_hash(GATEWAY_PUZZLE)
}

pub fn delegated_tail_hash() -> Bytes32 {
    template_hash(DELEGATED_TAIL)
}

pub fn mint_with_signature_hash() -> Bytes32 {
    template_hash(MINT_WITH_SIGNATURE)
}

pub fn melt_all_with_signature_hash() -> Bytes32 {
    template_hash(MELT_ALL_WITH_SIGNATURE)
}

pub fn melt_all_by_anyone_hash() -> Bytes32 {
    template_hash(MELT_ALL_BY_ANYONE)
}

fn template_hash(template: &[u8]) -> Bytes32 {
    let mut a = Allocator::new();
    // Templates are fixed byte strings; deserialization cannot fail.
    let node = bytes_to_node(&mut a, template).unwrap_or(NodePtr::NIL);
    tree_hash32(&a, node)
}

fn quote(a: &mut Allocator, node: NodePtr) -> Result<NodePtr, ClvmError> {
    let q = alloc_atom(a, OP_QUOTE)?;
    crate::foundation::clvm::alloc_pair(a, q, node)
}

/// Standard currying: `(a (q . program) (c (q . arg) ... 1))`.
pub fn curry(a: &mut Allocator, program: NodePtr, args: &[NodePtr]) -> Result<NodePtr, ClvmError> {
    let mut env = alloc_atom(a, OP_QUOTE)?;
    for arg in args.iter().rev() {
        let quoted = quote(a, *arg)?;
        let cons = alloc_atom(a, OP_CONS)?;
        env = alloc_list(a, &[cons, quoted, env])?;
    }
    let apply = alloc_atom(a, OP_APPLY)?;
    let quoted_program = quote(a, program)?;
    alloc_list(a, &[apply, quoted_program, env])
}

/// Inverse of [`curry`]. `None` when `node` is not in curried form.
pub fn uncurry(a: &Allocator, node: NodePtr) -> Option<(NodePtr, Vec<NodePtr>)> {
    let (apply, rest) = as_pair(a, node)?;
    if as_atom(a, apply)? != OP_APPLY {
        return None;
    }
    let (quoted_program, rest) = as_pair(a, rest)?;
    let (q, program) = as_pair(a, quoted_program)?;
    if as_atom(a, q)? != OP_QUOTE {
        return None;
    }
    let (mut env, tail) = as_pair(a, rest)?;
    if !as_atom(a, tail)?.is_empty() {
        return None;
    }
    let mut args = Vec::new();
    loop {
        match as_atom(a, env) {
            Some(atom) => {
                if atom != OP_QUOTE {
                    return None;
                }
                return Some((program, args));
            }
            None => {
                let (cons, rest) = as_pair(a, env)?;
                if as_atom(a, cons)? != OP_CONS {
                    return None;
                }
                let (quoted_arg, rest) = as_pair(a, rest)?;
                let (q, arg) = as_pair(a, quoted_arg)?;
                if as_atom(a, q)? != OP_QUOTE {
                    return None;
                }
                let (next, tail) = as_pair(a, rest)?;
                if !as_atom(a, tail)?.is_empty() {
                    return None;
                }
                args.push(arg);
                env = next;
            }
        }
    }
}

/// Wraps `inner` in the CAT outer puzzle for `asset_id`.
pub fn cat_puzzle(a: &mut Allocator, asset_id: Bytes32, inner: NodePtr) -> Result<NodePtr, ClvmError> {
    let cat = bytes_to_node(a, &CAT_PUZZLE)?;
    let mod_hash = alloc_atom(a, &CAT_PUZZLE_HASH)?;
    let asset = alloc_atom(a, asset_id.as_ref())?;
    curry(a, cat, &[mod_hash, asset, inner])
}

/// CAT outer puzzle hash computed from the inner puzzle hash alone, without
/// materializing either program.
pub fn cat_puzzle_hash(asset_id: Bytes32, inner_hash: Bytes32) -> Bytes32 {
    let mod_hash = TreeHash::new(CAT_PUZZLE_HASH);
    let args = [tree_hash_atom(&CAT_PUZZLE_HASH), tree_hash_atom(asset_id.as_ref()), TreeHash::new(inner_hash.into())];
    Bytes32::from(curry_tree_hash(mod_hash, &args).to_bytes())
}

/// Recognizes a CAT-wrapped puzzle reveal and returns its asset id and inner
/// puzzle. `None` when the reveal is not a CAT.
pub fn match_cat(a: &Allocator, puzzle: NodePtr) -> Option<(Bytes32, NodePtr)> {
    let (program, args) = uncurry(a, puzzle)?;
    if tree_hash32(a, program).as_ref() != CAT_PUZZLE_HASH {
        return None;
    }
    if args.len() != 3 {
        return None;
    }
    let asset_atom = as_atom(a, args[1])?;
    let asset_id = Bytes32::try_from(asset_atom.as_slice()).ok()?;
    Some((asset_id, args[2]))
}
