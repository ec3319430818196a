//! Thin helpers over the CLVM interpreter: atom encoding, list building,
//! tree hashing, and program/node conversions. Everything protocol-specific
//! (templates, currying, conditions) lives in the domain layer.

use chia_protocol::{Bytes32, Program};
use clvm_utils::tree_hash;
use clvmr::reduction::Reduction;
use clvmr::serde::{node_from_bytes, node_to_bytes};
use clvmr::{run_program, Allocator, ChiaDialect, NodePtr, SExp};
use thiserror::Error;

use crate::foundation::constants::MAX_CLVM_COST;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ClvmError(pub String);

impl ClvmError {
    fn new(context: &str, err: impl std::fmt::Debug) -> Self {
        ClvmError(format!("{context}: {err:?}"))
    }
}

/// Minimal signed big-endian encoding of an integer, as CLVM atoms store
/// them. Zero is the empty atom.
pub fn int_atom(value: i128) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let drop_byte = bytes[start];
        let next_high_bit = bytes[start + 1] & 0x80;
        let redundant = (drop_byte == 0x00 && next_high_bit == 0) || (drop_byte == 0xff && next_high_bit != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Sign-extended decode of a CLVM integer atom. `None` when the atom is
/// wider than 16 bytes.
pub fn atom_to_int(bytes: &[u8]) -> Option<i128> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 16 {
        return None;
    }
    let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Some(i128::from_be_bytes(buf))
}

pub fn str_atom(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

pub fn alloc_atom(a: &mut Allocator, bytes: &[u8]) -> Result<NodePtr, ClvmError> {
    a.new_atom(bytes).map_err(|err| ClvmError::new("new_atom", err))
}

pub fn alloc_pair(a: &mut Allocator, first: NodePtr, rest: NodePtr) -> Result<NodePtr, ClvmError> {
    a.new_pair(first, rest).map_err(|err| ClvmError::new("new_pair", err))
}

pub fn alloc_nil(a: &mut Allocator) -> Result<NodePtr, ClvmError> {
    alloc_atom(a, &[])
}

/// Builds a proper list from the given nodes.
pub fn alloc_list(a: &mut Allocator, items: &[NodePtr]) -> Result<NodePtr, ClvmError> {
    let mut node = alloc_nil(a)?;
    for item in items.iter().rev() {
        node = alloc_pair(a, *item, node)?;
    }
    Ok(node)
}

pub fn as_atom(a: &Allocator, node: NodePtr) -> Option<Vec<u8>> {
    match a.sexp(node) {
        SExp::Atom => Some(a.atom(node).to_vec()),
        SExp::Pair(_, _) => None,
    }
}

pub fn as_pair(a: &Allocator, node: NodePtr) -> Option<(NodePtr, NodePtr)> {
    match a.sexp(node) {
        SExp::Atom => None,
        SExp::Pair(first, rest) => Some((first, rest)),
    }
}

/// Collects a proper list into a vector; `None` for improper lists.
pub fn proper_list(a: &Allocator, node: NodePtr) -> Option<Vec<NodePtr>> {
    let mut items = Vec::new();
    let mut cursor = node;
    loop {
        match a.sexp(cursor) {
            SExp::Atom => {
                if a.atom(cursor).to_vec().is_empty() {
                    return Some(items);
                }
                return None;
            }
            SExp::Pair(first, rest) => {
                items.push(first);
                cursor = rest;
            }
        }
    }
}

pub fn tree_hash32(a: &Allocator, node: NodePtr) -> Bytes32 {
    Bytes32::from(tree_hash(a, node).to_bytes())
}

/// Value-tree hash of a list of atoms, computed in a scratch allocator.
pub fn tree_hash_of_list(atoms: &[Vec<u8>]) -> Result<Bytes32, ClvmError> {
    let mut a = Allocator::new();
    let nodes = atoms.iter().map(|atom| alloc_atom(&mut a, atom)).collect::<Result<Vec<_>, _>>()?;
    let list = alloc_list(&mut a, &nodes)?;
    Ok(tree_hash32(&a, list))
}

pub fn node_to_program(a: &Allocator, node: NodePtr) -> Result<Program, ClvmError> {
    let bytes = node_to_bytes(a, node).map_err(|err| ClvmError::new("node_to_bytes", err))?;
    Ok(Program::from(bytes))
}

pub fn program_to_node(a: &mut Allocator, program: &Program) -> Result<NodePtr, ClvmError> {
    node_from_bytes(a, program.as_ref()).map_err(|err| ClvmError::new("node_from_bytes", err))
}

pub fn bytes_to_node(a: &mut Allocator, bytes: &[u8]) -> Result<NodePtr, ClvmError> {
    node_from_bytes(a, bytes).map_err(|err| ClvmError::new("node_from_bytes", err))
}

/// Runs `puzzle` against `solution` under the ledger dialect and returns the
/// emitted value.
pub fn run_puzzle(a: &mut Allocator, puzzle: NodePtr, solution: NodePtr) -> Result<NodePtr, ClvmError> {
    let dialect = ChiaDialect::new(0);
    let Reduction(_cost, output) =
        run_program(a, &dialect, puzzle, solution, MAX_CLVM_COST).map_err(|err| ClvmError::new("run_program", err))?;
    Ok(output)
}
