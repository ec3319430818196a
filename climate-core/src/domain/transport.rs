//! Detokenization hand-off encoding.
//!
//! A partially signed melt bundle travels from the asset holder to the
//! registry as a bech32m string with the `detok` prefix. The payload is the
//! bundle's canonical serialization, so any compliant implementation can
//! produce or consume it; the checksum catches transcription errors before
//! any protocol-level validation runs.

use bech32::{FromBase32, ToBase32, Variant};
use chia_protocol::{Bytes32, CoinSpend, SpendBundle};
use chia_traits::Streamable;
use clvmr::Allocator;

use crate::foundation::clvm::{program_to_node, tree_hash32};
use crate::foundation::constants::DETOK_HRP;
use crate::foundation::error::{ClimateError, ProtocolViolation, TransportError, WalletError};
use crate::foundation::types::GatewayMode;

use super::gateway::{parse_gateway_spend, spend_additions};
use super::puzzles::{gateway_puzzle_hash, match_cat};

/// A decoded and validated detokenization hand-off.
#[derive(Clone, Debug)]
pub struct DetokenizationRequest {
    pub bundle: SpendBundle,
    pub mode: GatewayMode,
    pub asset_id: Bytes32,
    /// Inner puzzle hash of the holder's origin coin, for the refund leg.
    pub from_puzzle_hash: Bytes32,
    /// Units melted by the gateway spend.
    pub amount: u64,
    /// Network fee the holder attached, net of the melted units.
    pub fee: u64,
    pub gateway_coin_spend: CoinSpend,
}

pub fn encode_detokenization(bundle: &SpendBundle) -> Result<String, ClimateError> {
    let bytes = bundle.to_bytes().map_err(|err| TransportError::InvalidEncoding(err.to_string()))?;
    bech32::encode(DETOK_HRP, bytes.to_base32(), Variant::Bech32m)
        .map_err(|err| TransportError::InvalidEncoding(err.to_string()).into())
}

pub fn decode_detokenization(content: &str) -> Result<SpendBundle, ClimateError> {
    let (hrp, data, variant) =
        bech32::decode(content).map_err(|err| TransportError::InvalidEncoding(err.to_string()))?;
    if hrp != DETOK_HRP {
        return Err(TransportError::InvalidEncoding(format!("unexpected prefix '{hrp}'")).into());
    }
    if variant != Variant::Bech32m {
        return Err(TransportError::InvalidEncoding("wrong bech32 variant".into()).into());
    }
    let bytes =
        Vec::<u8>::from_base32(&data).map_err(|err| TransportError::InvalidEncoding(err.to_string()))?;
    SpendBundle::from_bytes(&bytes).map_err(|err| TransportError::InvalidEncoding(err.to_string()).into())
}

/// Decodes a hand-off string and recovers everything the registry needs to
/// countersign: the gateway spend, the asset, the holder's return puzzle
/// hash, and the melted amount and fee. The fee is recomputed from the
/// bundle's own coins rather than trusted from the sender.
pub fn parse_detokenization_request(content: &str) -> Result<DetokenizationRequest, ClimateError> {
    let bundle = decode_detokenization(content)?;
    let mut a = Allocator::new();

    let mut found: Option<(usize, Bytes32)> = None;
    for (position, spend) in bundle.coin_spends.iter().enumerate() {
        let puzzle = program_to_node(&mut a, &spend.puzzle_reveal)
            .map_err(|err| ProtocolViolation::interpreter("detokenization parse", err))?;
        let Some((asset_id, inner)) = match_cat(&a, puzzle) else {
            continue;
        };
        if tree_hash32(&a, inner) == gateway_puzzle_hash() {
            found = Some((position, asset_id));
            break;
        }
    }
    let (position, asset_id) = found.ok_or(TransportError::MissingGatewaySpend)?;
    let gateway_coin_spend = bundle.coin_spends[position].clone();

    let parsed = parse_gateway_spend(&gateway_coin_spend, true)?;
    if parsed.mode != GatewayMode::Detokenization {
        return Err(WalletError::WrongMode { expected: GatewayMode::Detokenization, actual: parsed.mode }.into());
    }

    let parent_id = gateway_coin_spend.coin.parent_coin_info;
    let mut from_puzzle_hash = None;
    for spend in &bundle.coin_spends {
        if spend.coin.coin_id() != parent_id {
            continue;
        }
        let puzzle = program_to_node(&mut a, &spend.puzzle_reveal)
            .map_err(|err| ProtocolViolation::interpreter("detokenization parse", err))?;
        let (_origin_asset, inner) = match_cat(&a, puzzle).ok_or_else(|| {
            TransportError::InvalidEncoding("origin spend is not a CAT".into())
        })?;
        from_puzzle_hash = Some(tree_hash32(&a, inner));
        break;
    }
    let from_puzzle_hash =
        from_puzzle_hash.ok_or_else(|| TransportError::InvalidEncoding("origin spend not present".into()))?;

    let amount = gateway_coin_spend.coin.amount;
    let fee = bundle_fee(&bundle)?.saturating_sub(amount);

    Ok(DetokenizationRequest {
        bundle,
        mode: parsed.mode,
        asset_id,
        from_puzzle_hash,
        amount,
        fee,
        gateway_coin_spend,
    })
}

/// Total value consumed minus value recreated across the bundle. Sentinel
/// amounts are melt markers, not outputs, so melted value lands here too.
fn bundle_fee(bundle: &SpendBundle) -> Result<u64, ClimateError> {
    let mut consumed: u128 = 0;
    let mut produced: u128 = 0;
    for spend in &bundle.coin_spends {
        consumed += u128::from(spend.coin.amount);
        for addition in spend_additions(spend)? {
            produced += u128::from(addition.amount);
        }
    }
    Ok(consumed.saturating_sub(produced) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gateway::{authority_reveal_condition, recipient_condition};
    use crate::domain::puzzles::{self, cat_puzzle};
    use crate::domain::tail::{delegated_puzzle, tail_program};
    use crate::foundation::clvm::{alloc_list, alloc_nil, alloc_pair, node_to_program};
    use chia_bls::{SecretKey, Signature};
    use chia_protocol::Coin;

    fn melt_bundle(melt_amount: u64, origin_amount: u64) -> SpendBundle {
        let mut a = Allocator::new();
        let root = SecretKey::from_seed(b"transport test seed ############").public_key();
        let asset_id = Bytes32::from([0x42; 32]);
        let index_hash = Bytes32::from([0x24; 32]);

        // Gateway inner: the melt reveal as the only condition.
        let tail = tail_program(&mut a, &root, index_hash).unwrap();
        let delegated =
            delegated_puzzle(&mut a, GatewayMode::Detokenization, puzzles::gateway_puzzle_hash(), Some(&root)).unwrap();
        let nil = alloc_nil(&mut a).unwrap();
        let tail_solution = alloc_list(&mut a, &[delegated, nil]).unwrap();
        let reveal = authority_reveal_condition(&mut a, tail, tail_solution).unwrap();
        let gateway_conditions = alloc_list(&mut a, &[reveal]).unwrap();
        let gateway_inner = puzzles::gateway_node(&mut a).unwrap();
        let gateway_cat = cat_puzzle(&mut a, asset_id, gateway_inner).unwrap();
        let gateway_cat_hash = tree_hash32(&a, gateway_cat);

        // Origin inner: quoted conditions paying the gateway coin.
        let payment = recipient_condition(&mut a, gateway_cat_hash, melt_amount).unwrap();
        let origin_conditions = alloc_list(&mut a, &[payment]).unwrap();
        let quote = crate::foundation::clvm::alloc_atom(&mut a, &[1]).unwrap();
        let origin_inner = alloc_pair(&mut a, quote, origin_conditions).unwrap();
        let origin_cat = cat_puzzle(&mut a, asset_id, origin_inner).unwrap();
        let origin_cat_hash = tree_hash32(&a, origin_cat);

        let origin_coin = Coin::new(Bytes32::from([0x01; 32]), origin_cat_hash, origin_amount);
        let gateway_coin = Coin::new(origin_coin.coin_id(), gateway_cat_hash, melt_amount);

        let origin_inner_solution = alloc_nil(&mut a).unwrap();
        let origin_solution = alloc_list(&mut a, &[origin_inner_solution]).unwrap();
        let gateway_inner_solution = alloc_list(&mut a, &[gateway_conditions]).unwrap();
        let gateway_solution = alloc_list(&mut a, &[gateway_inner_solution]).unwrap();

        SpendBundle::new(
            vec![
                CoinSpend::new(
                    origin_coin,
                    node_to_program(&a, origin_cat).unwrap(),
                    node_to_program(&a, origin_solution).unwrap(),
                ),
                CoinSpend::new(
                    gateway_coin,
                    node_to_program(&a, gateway_cat).unwrap(),
                    node_to_program(&a, gateway_solution).unwrap(),
                ),
            ],
            Signature::default(),
        )
    }

    #[test]
    fn encode_decode_round_trips() {
        let bundle = melt_bundle(10, 15);
        let content = encode_detokenization(&bundle).unwrap();
        assert!(content.starts_with("detok1"));
        let decoded = decode_detokenization(&content).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn corrupted_content_is_rejected() {
        let bundle = melt_bundle(10, 15);
        let mut content = encode_detokenization(&bundle).unwrap();
        let last = content.pop().unwrap();
        let replacement = if last == 'q' { 'p' } else { 'q' };
        content.push(replacement);
        assert!(decode_detokenization(&content).is_err());
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let bundle = melt_bundle(10, 15);
        let bytes = bundle.to_bytes().unwrap();
        let content = bech32::encode("other", bytes.to_base32(), Variant::Bech32m).unwrap();
        let err = decode_detokenization(&content).unwrap_err();
        assert!(matches!(err, ClimateError::Transport(TransportError::InvalidEncoding(_))));
    }

    #[test]
    fn parses_melt_request() {
        let bundle = melt_bundle(10, 15);
        let origin_spend = bundle.coin_spends[0].clone();
        let content = encode_detokenization(&bundle).unwrap();
        let request = parse_detokenization_request(&content).unwrap();
        assert_eq!(request.mode, GatewayMode::Detokenization);
        assert_eq!(request.asset_id, Bytes32::from([0x42; 32]));
        assert_eq!(request.amount, 10);
        // 15 in from the origin, 10 recreated then melted: 5 left as fee.
        assert_eq!(request.fee, 5);
        assert_eq!(request.gateway_coin_spend.coin.parent_coin_info, origin_spend.coin.coin_id());

        let mut a = Allocator::new();
        let origin_puzzle = program_to_node(&mut a, &origin_spend.puzzle_reveal).unwrap();
        let (_asset, origin_inner) = match_cat(&a, origin_puzzle).unwrap();
        assert_eq!(request.from_puzzle_hash, tree_hash32(&a, origin_inner));
    }

    #[test]
    fn bundle_without_gateway_spend_is_rejected() {
        let bundle = melt_bundle(10, 15);
        let stripped = SpendBundle::new(vec![bundle.coin_spends[0].clone()], Signature::default());
        let content = encode_detokenization(&stripped).unwrap();
        let err = parse_detokenization_request(&content).unwrap_err();
        assert!(matches!(err, ClimateError::Transport(TransportError::MissingGatewaySpend)));
    }
}
