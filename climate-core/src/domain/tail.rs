//! Token authority layer (TAIL) construction.
//!
//! One TAIL exists per asset: the delegated-tail template curried with the
//! root public key and the asset index hash. Its tree hash is the asset id,
//! so the asset's identity commits to both the issuing authority and the
//! index tuple. Supply changes are delegated: the TAIL solution carries a
//! per-mode delegated puzzle which the TAIL runs in place.

use chia_bls::PublicKey;
use chia_protocol::Bytes32;
use clvmr::{Allocator, NodePtr};

use crate::foundation::clvm::{alloc_atom, tree_hash32, ClvmError};
use crate::foundation::error::{ClimateError, ConfigurationError, ProtocolViolation};
use crate::foundation::types::GatewayMode;

use super::puzzles;

/// Curries the delegated-tail template with the issuing key and index hash.
pub fn tail_program(a: &mut Allocator, root_public_key: &PublicKey, index_hash: Bytes32) -> Result<NodePtr, ClimateError> {
    build_tail(a, root_public_key, index_hash).map_err(|err| ProtocolViolation::interpreter("tail program", err).into())
}

fn build_tail(a: &mut Allocator, root_public_key: &PublicKey, index_hash: Bytes32) -> Result<NodePtr, ClvmError> {
    let template = puzzles::delegated_tail_node(a)?;
    let key = alloc_atom(a, &root_public_key.to_bytes())?;
    let index = alloc_atom(a, index_hash.as_ref())?;
    puzzles::curry(a, template, &[key, index])
}

/// The asset id: tree hash of the fully curried TAIL.
pub fn asset_id(root_public_key: &PublicKey, index_hash: Bytes32) -> Result<Bytes32, ClimateError> {
    let mut a = Allocator::new();
    let tail = tail_program(&mut a, root_public_key, index_hash)?;
    Ok(tree_hash32(&a, tail))
}

/// The per-mode delegated puzzle. Every mode curries the gateway puzzle
/// hash, so the root authorization commits to the wrapper the supply change
/// runs under. Signature-carrying modes additionally curry the mode's
/// gateway key; permissionless retirement takes no key.
pub fn delegated_puzzle(
    a: &mut Allocator,
    mode: GatewayMode,
    gateway_hash: Bytes32,
    mode_public_key: Option<&PublicKey>,
) -> Result<NodePtr, ClimateError> {
    let interp = |err: ClvmError| ClimateError::from(ProtocolViolation::interpreter("delegated puzzle", err));
    let hash_atom = alloc_atom(a, gateway_hash.as_ref()).map_err(interp)?;
    let template = match mode {
        GatewayMode::Tokenization => puzzles::MINT_WITH_SIGNATURE,
        GatewayMode::Detokenization => puzzles::MELT_ALL_WITH_SIGNATURE,
        GatewayMode::PermissionlessRetirement => {
            let node = crate::foundation::clvm::bytes_to_node(a, puzzles::MELT_ALL_BY_ANYONE).map_err(interp)?;
            return puzzles::curry(a, node, &[hash_atom]).map_err(interp);
        }
    };
    let key = mode_public_key.ok_or(ConfigurationError::MissingKey(mode))?;
    let node = crate::foundation::clvm::bytes_to_node(a, template).map_err(interp)?;
    let key_atom = alloc_atom(a, &key.to_bytes()).map_err(interp)?;
    puzzles::curry(a, node, &[key_atom, hash_atom]).map_err(interp)
}

/// Classifies a delegated puzzle reveal by its template hash. Curried reveals
/// are matched on their uncurried body.
pub fn match_mode(a: &Allocator, delegated: NodePtr) -> Option<GatewayMode> {
    let body = match puzzles::uncurry(a, delegated) {
        Some((program, _args)) => program,
        None => delegated,
    };
    let hash = tree_hash32(a, body);
    if hash == puzzles::mint_with_signature_hash() {
        Some(GatewayMode::Tokenization)
    } else if hash == puzzles::melt_all_with_signature_hash() {
        Some(GatewayMode::Detokenization)
    } else if hash == puzzles::melt_all_by_anyone_hash() {
        Some(GatewayMode::PermissionlessRetirement)
    } else {
        None
    }
}

/// Message the root key co-signs for every supply change: the value-tree
/// hash of `(index_hash delegated_puzzle)`. Binding the index hash here
/// prevents replaying one asset's authorization against another.
pub fn authority_message(a: &mut Allocator, index_hash: Bytes32, delegated: NodePtr) -> Result<Bytes32, ClimateError> {
    let index = alloc_atom(a, index_hash.as_ref())
        .map_err(|err| ProtocolViolation::interpreter("authority message", err))?;
    let list = crate::foundation::clvm::alloc_list(a, &[index, delegated])
        .map_err(|err| ProtocolViolation::interpreter("authority message", err))?;
    Ok(tree_hash32(a, list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chia_bls::SecretKey;

    fn root_key() -> PublicKey {
        SecretKey::from_seed(b"tail module test seed ##########").public_key()
    }

    #[test]
    fn asset_id_commits_to_index() {
        let key = root_key();
        let a = asset_id(&key, Bytes32::from([1; 32])).unwrap();
        let b = asset_id(&key, Bytes32::from([2; 32])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn asset_id_commits_to_authority() {
        let other = SecretKey::from_seed(b"another authority ##############").public_key();
        let index = Bytes32::from([7; 32]);
        assert_ne!(asset_id(&root_key(), index).unwrap(), asset_id(&other, index).unwrap());
    }

    #[test]
    fn delegated_puzzles_classify_by_mode() {
        let mut a = Allocator::new();
        let key = root_key();
        let gateway = puzzles::gateway_puzzle_hash();
        for mode in GatewayMode::ALL {
            let key_arg = mode.requires_signature().then_some(&key);
            let delegated = delegated_puzzle(&mut a, mode, gateway, key_arg).unwrap();
            assert_eq!(match_mode(&a, delegated), Some(mode));
        }
    }

    #[test]
    fn delegated_puzzles_commit_to_the_gateway_hash() {
        let mut a = Allocator::new();
        let key = root_key();
        let gateway = puzzles::gateway_puzzle_hash();
        let foreign = Bytes32::from([0xd1; 32]);
        for mode in GatewayMode::ALL {
            let key_arg = mode.requires_signature().then_some(&key);
            let bound = delegated_puzzle(&mut a, mode, gateway, key_arg).unwrap();
            let rebound = delegated_puzzle(&mut a, mode, foreign, key_arg).unwrap();
            assert_ne!(tree_hash32(&a, bound), tree_hash32(&a, rebound));

            let (_, args) = puzzles::uncurry(&a, bound).unwrap();
            let last = crate::foundation::clvm::as_atom(&a, *args.last().unwrap()).unwrap();
            assert_eq!(last, gateway.as_ref().to_vec());
        }
    }

    #[test]
    fn signature_modes_require_a_key() {
        let mut a = Allocator::new();
        let gateway = puzzles::gateway_puzzle_hash();
        for mode in [GatewayMode::Tokenization, GatewayMode::Detokenization] {
            let err = delegated_puzzle(&mut a, mode, gateway, None).unwrap_err();
            assert!(matches!(
                err,
                ClimateError::Configuration(ConfigurationError::MissingKey(m)) if m == mode
            ));
        }
    }

    #[test]
    fn unknown_delegated_puzzle_is_unmatched() {
        let mut a = Allocator::new();
        let gateway = puzzles::gateway_node(&mut a).unwrap();
        assert_eq!(match_mode(&a, gateway), None);
    }

    #[test]
    fn authority_message_binds_index_hash() {
        let mut a = Allocator::new();
        let gateway = puzzles::gateway_puzzle_hash();
        let delegated = delegated_puzzle(&mut a, GatewayMode::PermissionlessRetirement, gateway, None).unwrap();
        let first = authority_message(&mut a, Bytes32::from([1; 32]), delegated).unwrap();
        let second = authority_message(&mut a, Bytes32::from([2; 32]), delegated).unwrap();
        assert_ne!(first, second);
    }
}
