//! Signature obligations for gateway spends.
//!
//! Obligations are recovered by replaying the spend's conditions, exactly as
//! a validating node would, rather than trusting whatever the builder says
//! it signed. AGG_SIG_ME messages are domain-separated with the coin id and
//! the network's extra data; AGG_SIG_UNSAFE messages are signed as-is.

use std::collections::HashMap;

use chia_bls::{sign, PublicKey, SecretKey, Signature};
use chia_protocol::{Bytes32, CoinSpend};
use clvmr::Allocator;

use crate::foundation::clvm::{as_atom, as_pair, atom_to_int, program_to_node, proper_list, run_puzzle};
use crate::foundation::constants::{AGG_SIG_ME, AGG_SIG_UNSAFE};
use crate::foundation::error::{ClimateError, ProtocolViolation, SigningError};

use super::puzzles::match_cat;

/// One signature the ledger will demand for a spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignaturePair {
    pub public_key: PublicKey,
    /// The final message to sign, with any domain separation already applied.
    pub message: Vec<u8>,
}

/// Secrets keyed by their public key bytes.
pub type SecretsByKey = HashMap<[u8; 48], SecretKey>;

/// Detached signatures keyed by public key bytes and raw message.
pub type SignaturesByKeyMessage = HashMap<([u8; 48], Vec<u8>), Signature>;

/// Replays a spend and collects its AGG_SIG obligations in condition order.
///
/// CAT-wrapped reveals are unwrapped first so the inner condition list is
/// what gets replayed; the coin id used for AGG_SIG_ME domain separation is
/// still the outer coin's.
pub fn signature_pairs(spend: &CoinSpend, agg_sig_extra: &Bytes32) -> Result<Vec<SignaturePair>, ClimateError> {
    let interp = |err: &dyn std::fmt::Display| ProtocolViolation::interpreter("signature replay", err);

    let mut a = Allocator::new();
    let mut puzzle = program_to_node(&mut a, &spend.puzzle_reveal).map_err(|e| interp(&e))?;
    let mut solution = program_to_node(&mut a, &spend.solution).map_err(|e| interp(&e))?;
    if let Some((_asset_id, inner)) = match_cat(&a, puzzle) {
        let (inner_solution, _rest) = as_pair(&a, solution)
            .ok_or_else(|| ProtocolViolation::MalformedCondition("CAT solution missing inner solution".into()))?;
        puzzle = inner;
        solution = inner_solution;
    }

    let output = run_puzzle(&mut a, puzzle, solution).map_err(|e| interp(&e))?;
    let conditions = proper_list(&a, output)
        .ok_or_else(|| ProtocolViolation::MalformedCondition("condition output is not a list".into()))?;

    let coin_id = spend.coin.coin_id();
    let mut pairs = Vec::new();
    for condition in conditions {
        let Some(parts) = proper_list(&a, condition) else {
            continue;
        };
        if parts.len() < 3 {
            continue;
        }
        let Some(opcode) = as_atom(&a, parts[0]).and_then(|atom| atom_to_int(&atom)) else {
            continue;
        };
        if opcode != i128::from(AGG_SIG_UNSAFE) && opcode != i128::from(AGG_SIG_ME) {
            continue;
        }
        let key_bytes = as_atom(&a, parts[1])
            .ok_or_else(|| ProtocolViolation::MalformedCondition("AGG_SIG key is not an atom".into()))?;
        let key_array: [u8; 48] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolViolation::MalformedCondition("AGG_SIG key is not 48 bytes".into()))?;
        let public_key = PublicKey::from_bytes(&key_array)
            .map_err(|err| ProtocolViolation::MalformedCondition(format!("invalid AGG_SIG key: {err:?}")))?;
        let mut message = as_atom(&a, parts[2])
            .ok_or_else(|| ProtocolViolation::MalformedCondition("AGG_SIG message is not an atom".into()))?;
        if opcode == i128::from(AGG_SIG_ME) {
            message.extend_from_slice(coin_id.as_ref());
            message.extend_from_slice(agg_sig_extra.as_ref());
        }
        pairs.push(SignaturePair { public_key, message });
    }
    Ok(pairs)
}

/// Produces the aggregate signature covering every obligation in `spend`.
///
/// Each obligation is satisfied from `secrets` when the key is held, or from
/// `precomputed` when a detached signature was supplied (the detokenization
/// hand-off). With `allow_missing`, unsatisfiable obligations are skipped so
/// a partial aggregate can be produced for the counterparty to complete.
pub fn sign_gateway_spend(
    spend: &CoinSpend,
    agg_sig_extra: &Bytes32,
    secrets: &SecretsByKey,
    precomputed: &SignaturesByKeyMessage,
    allow_missing: bool,
) -> Result<Signature, ClimateError> {
    let mut aggregate = Signature::default();
    for pair in signature_pairs(spend, agg_sig_extra)? {
        let key_bytes = pair.public_key.to_bytes();
        if let Some(secret) = secrets.get(&key_bytes) {
            aggregate += &sign(secret, &pair.message);
        } else if let Some(signature) = precomputed.get(&(key_bytes, pair.message.clone())) {
            aggregate += signature;
        } else if !allow_missing {
            return Err(SigningError::MissingKey {
                public_key: hex::encode(key_bytes),
                message: hex::encode(&pair.message),
            }
            .into());
        }
    }
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gateway::{agg_sig_me_condition, agg_sig_unsafe_condition, gateway_solution};
    use crate::domain::puzzles;
    use crate::foundation::clvm::{alloc_list, node_to_program};
    use chia_bls::verify;
    use chia_protocol::Coin;

    fn extra() -> Bytes32 {
        Bytes32::from([0xcc; 32])
    }

    fn spend_with_conditions(build: impl FnOnce(&mut Allocator) -> Vec<clvmr::NodePtr>) -> CoinSpend {
        let mut a = Allocator::new();
        let items = build(&mut a);
        let conditions = alloc_list(&mut a, &items).unwrap();
        let gateway = puzzles::gateway_node(&mut a).unwrap();
        let solution = gateway_solution(&mut a, conditions).unwrap();
        CoinSpend::new(
            Coin::new(Bytes32::from([1; 32]), Bytes32::from([2; 32]), 7),
            node_to_program(&a, gateway).unwrap(),
            node_to_program(&a, solution).unwrap(),
        )
    }

    #[test]
    fn agg_sig_me_is_domain_separated() {
        let secret = SecretKey::from_seed(b"signing test seed ##############");
        let key = secret.public_key();
        let spend = spend_with_conditions(|a| {
            vec![
                agg_sig_unsafe_condition(a, &key, b"unsafe message").unwrap(),
                agg_sig_me_condition(a, &key, b"me message").unwrap(),
            ]
        });
        let pairs = signature_pairs(&spend, &extra()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].message, b"unsafe message".to_vec());
        let mut expected = b"me message".to_vec();
        expected.extend_from_slice(spend.coin.coin_id().as_ref());
        expected.extend_from_slice(extra().as_ref());
        assert_eq!(pairs[1].message, expected);
    }

    #[test]
    fn signs_with_held_secrets() {
        let secret = SecretKey::from_seed(b"signing test seed ##############");
        let key = secret.public_key();
        let spend = spend_with_conditions(|a| vec![agg_sig_unsafe_condition(a, &key, b"payload").unwrap()]);
        let mut secrets = SecretsByKey::new();
        secrets.insert(key.to_bytes(), secret);
        let aggregate =
            sign_gateway_spend(&spend, &extra(), &secrets, &SignaturesByKeyMessage::new(), false).unwrap();
        assert!(verify(&aggregate, &key, b"payload"));
    }

    #[test]
    fn partial_then_detached_equals_full() {
        let holder = SecretKey::from_seed(b"holder seed ####################");
        let authority = SecretKey::from_seed(b"authority seed #################");
        let spend = spend_with_conditions(|a| {
            vec![
                agg_sig_unsafe_condition(a, &holder.public_key(), b"holder msg").unwrap(),
                agg_sig_unsafe_condition(a, &authority.public_key(), b"authority msg").unwrap(),
            ]
        });

        let mut all = SecretsByKey::new();
        all.insert(holder.public_key().to_bytes(), holder.clone());
        all.insert(authority.public_key().to_bytes(), authority.clone());
        let full = sign_gateway_spend(&spend, &extra(), &all, &SignaturesByKeyMessage::new(), false).unwrap();

        let mut holder_only = SecretsByKey::new();
        holder_only.insert(holder.public_key().to_bytes(), holder);
        let partial =
            sign_gateway_spend(&spend, &extra(), &holder_only, &SignaturesByKeyMessage::new(), true).unwrap();

        let mut detached = SignaturesByKeyMessage::new();
        detached.insert(
            (authority.public_key().to_bytes(), b"authority msg".to_vec()),
            sign(&authority, b"authority msg"),
        );
        let completed = sign_gateway_spend(&spend, &extra(), &SecretsByKey::new(), &detached, true).unwrap();

        assert_eq!(&partial + &completed, full);
    }

    #[test]
    fn missing_key_is_an_error_when_strict() {
        let secret = SecretKey::from_seed(b"signing test seed ##############");
        let key = secret.public_key();
        let spend = spend_with_conditions(|a| vec![agg_sig_unsafe_condition(a, &key, b"payload").unwrap()]);
        let err = sign_gateway_spend(&spend, &extra(), &SecretsByKey::new(), &SignaturesByKeyMessage::new(), false)
            .unwrap_err();
        assert!(matches!(err, ClimateError::Signing(SigningError::MissingKey { .. })));
    }

    #[test]
    fn no_obligations_yields_identity() {
        let spend = spend_with_conditions(|_a| Vec::new());
        let aggregate =
            sign_gateway_spend(&spend, &extra(), &SecretsByKey::new(), &SignaturesByKeyMessage::new(), false).unwrap();
        assert_eq!(aggregate, Signature::default());
    }
}
