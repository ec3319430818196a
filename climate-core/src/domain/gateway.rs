//! Gateway spend assembly and classification.
//!
//! A gateway spend's solution is a single condition list; the puzzle emits it
//! verbatim. Supply changes announce themselves through one CREATE_COIN with
//! the melt-sentinel amount whose trailing arguments reveal the TAIL program
//! and its solution. Classification works backwards from that reveal.

use std::collections::BTreeMap;

use chia_bls::PublicKey;
use chia_protocol::{Bytes32, Coin, CoinSpend};
use clvmr::{Allocator, NodePtr};
use sha2::{Digest, Sha256};

use crate::foundation::clvm::{
    alloc_atom, alloc_list, alloc_nil, as_atom, as_pair, atom_to_int, int_atom, node_to_program, program_to_node,
    proper_list, run_puzzle, tree_hash32,
};
use crate::foundation::constants::{
    AGG_SIG_ME, AGG_SIG_UNSAFE, CREATE_COIN, CREATE_COIN_ANNOUNCEMENT, MELT_SENTINEL_AMOUNT,
    METADATA_KEY_BENEFICIARY_ADDRESS, METADATA_KEY_BENEFICIARY_NAME, METADATA_KEY_BENEFICIARY_PUZZLE_HASH,
};
use crate::foundation::error::{ClimateError, ProtocolViolation};
use crate::foundation::types::GatewayMode;

use super::puzzles::{self, match_cat, uncurry};
use super::tail::match_mode;

/// A spend classified as a gateway supply change.
#[derive(Clone, Debug)]
pub struct ParsedGateway {
    pub mode: GatewayMode,
    /// The revealed TAIL program and solution, keyed to the gateway coin.
    pub tail_spend: CoinSpend,
}

/// A coin announcement emitted by a gateway spend, binding the full condition
/// list so collaborating spends can assert it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub coin_id: Bytes32,
    pub message: Bytes32,
}

impl Announcement {
    /// Ledger announcement id: sha256 of the coin id and message.
    pub fn name(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        hasher.update(self.coin_id);
        hasher.update(self.message);
        Bytes32::from(<[u8; 32]>::from(hasher.finalize()))
    }
}

fn interp(err: impl std::fmt::Display) -> ClimateError {
    ProtocolViolation::interpreter("gateway", err.to_string()).into()
}

/// `(51 () -113 tail_program tail_solution)` -- the supply-change reveal.
pub fn authority_reveal_condition(
    a: &mut Allocator,
    tail_program: NodePtr,
    tail_solution: NodePtr,
) -> Result<NodePtr, ClimateError> {
    let opcode = alloc_atom(a, &int_atom(i128::from(CREATE_COIN))).map_err(interp)?;
    let nil_hash = alloc_nil(a).map_err(interp)?;
    let sentinel = alloc_atom(a, &int_atom(i128::from(MELT_SENTINEL_AMOUNT))).map_err(interp)?;
    alloc_list(a, &[opcode, nil_hash, sentinel, tail_program, tail_solution]).map_err(interp)
}

/// `(51 puzzle_hash amount (puzzle_hash))` -- payment with a hint memo.
pub fn recipient_condition(a: &mut Allocator, puzzle_hash: Bytes32, amount: u64) -> Result<NodePtr, ClimateError> {
    let opcode = alloc_atom(a, &int_atom(i128::from(CREATE_COIN))).map_err(interp)?;
    let target = alloc_atom(a, puzzle_hash.as_ref()).map_err(interp)?;
    let value = alloc_atom(a, &int_atom(i128::from(amount))).map_err(interp)?;
    let hint = alloc_atom(a, puzzle_hash.as_ref()).map_err(interp)?;
    let memos = alloc_list(a, &[hint]).map_err(interp)?;
    alloc_list(a, &[opcode, target, value, memos]).map_err(interp)
}

pub fn agg_sig_unsafe_condition(a: &mut Allocator, key: &PublicKey, message: &[u8]) -> Result<NodePtr, ClimateError> {
    agg_sig_condition(a, AGG_SIG_UNSAFE, key, message)
}

pub fn agg_sig_me_condition(a: &mut Allocator, key: &PublicKey, message: &[u8]) -> Result<NodePtr, ClimateError> {
    agg_sig_condition(a, AGG_SIG_ME, key, message)
}

fn agg_sig_condition(a: &mut Allocator, opcode: u8, key: &PublicKey, message: &[u8]) -> Result<NodePtr, ClimateError> {
    let op = alloc_atom(a, &int_atom(i128::from(opcode))).map_err(interp)?;
    let key_atom = alloc_atom(a, &key.to_bytes()).map_err(interp)?;
    let msg = alloc_atom(a, message).map_err(interp)?;
    alloc_list(a, &[op, key_atom, msg]).map_err(interp)
}

pub fn create_coin_announcement_condition(a: &mut Allocator, message: &[u8]) -> Result<NodePtr, ClimateError> {
    let op = alloc_atom(a, &int_atom(i128::from(CREATE_COIN_ANNOUNCEMENT))).map_err(interp)?;
    let msg = alloc_atom(a, message).map_err(interp)?;
    alloc_list(a, &[op, msg]).map_err(interp)
}

/// The gateway solution is the condition list as the sole solution argument.
pub fn gateway_solution(a: &mut Allocator, conditions: NodePtr) -> Result<NodePtr, ClimateError> {
    alloc_list(a, &[conditions]).map_err(interp)
}

/// Announcement a gateway spend with `conditions` makes: the message is the
/// tree hash of the condition list.
pub fn gateway_announcement(a: &Allocator, coin: &Coin, conditions: NodePtr) -> Announcement {
    Announcement { coin_id: coin.coin_id(), message: tree_hash32(a, conditions) }
}

/// Classifies a spend as a gateway supply change.
///
/// `is_cat` selects whether the reveal is CAT-wrapped (melt side) or the
/// bare gateway puzzle (issuance side). Exactly one melt-sentinel CREATE_COIN
/// must be present, its TAIL must be the delegated-tail template, and the
/// delegated puzzle must match a known mode.
pub fn parse_gateway_spend(spend: &CoinSpend, is_cat: bool) -> Result<ParsedGateway, ClimateError> {
    let mut a = Allocator::new();
    let mut puzzle = program_to_node(&mut a, &spend.puzzle_reveal).map_err(interp)?;
    let mut solution = program_to_node(&mut a, &spend.solution).map_err(interp)?;

    if is_cat {
        let (_asset_id, inner) = match_cat(&a, puzzle)
            .ok_or_else(|| ProtocolViolation::MalformedCondition("expected a CAT puzzle reveal".into()))?;
        let (inner_solution, _rest) = as_pair(&a, solution)
            .ok_or_else(|| ProtocolViolation::MalformedCondition("CAT solution missing inner solution".into()))?;
        puzzle = inner;
        solution = inner_solution;
    }

    let output = run_puzzle(&mut a, puzzle, solution).map_err(interp)?;
    let conditions = proper_list(&a, output)
        .ok_or_else(|| ProtocolViolation::MalformedCondition("condition output is not a list".into()))?;

    let mut reveal: Option<(NodePtr, NodePtr)> = None;
    for condition in conditions {
        let Some(parts) = proper_list(&a, condition) else {
            continue;
        };
        if parts.len() < 3 {
            continue;
        }
        let opcode = as_atom(&a, parts[0]).and_then(|atom| atom_to_int(&atom));
        if opcode != Some(i128::from(CREATE_COIN)) {
            continue;
        }
        let amount = as_atom(&a, parts[2]).and_then(|atom| atom_to_int(&atom));
        if amount != Some(i128::from(MELT_SENTINEL_AMOUNT)) {
            continue;
        }
        if parts.len() < 5 {
            return Err(ProtocolViolation::MalformedCondition(
                "melt-sentinel condition is missing the authority reveal".into(),
            )
            .into());
        }
        if reveal.is_some() {
            return Err(ProtocolViolation::DuplicateAuthority.into());
        }
        reveal = Some((parts[3], parts[4]));
    }
    let (tail_program, tail_solution) = reveal.ok_or(ProtocolViolation::NoAuthorityFound)?;

    let tail_body = match uncurry(&a, tail_program) {
        Some((program, _args)) => program,
        None => tail_program,
    };
    let tail_hash = tree_hash32(&a, tail_body);
    if tail_hash != puzzles::delegated_tail_hash() {
        return Err(ProtocolViolation::UnknownAuthority { mod_hash: hex::encode(tail_hash) }.into());
    }

    let (delegated, _rest) = as_pair(&a, tail_solution)
        .ok_or_else(|| ProtocolViolation::MalformedCondition("TAIL solution missing delegated puzzle".into()))?;
    let mode = match_mode(&a, delegated).ok_or_else(|| {
        let body = match uncurry(&a, delegated) {
            Some((program, _args)) => program,
            None => delegated,
        };
        ProtocolViolation::UnknownMode { mod_hash: hex::encode(tree_hash32(&a, body)) }
    })?;

    let tail_spend = CoinSpend::new(
        spend.coin.clone(),
        node_to_program(&a, tail_program).map_err(interp)?,
        node_to_program(&a, tail_solution).map_err(interp)?,
    );
    Ok(ParsedGateway { mode, tail_spend })
}

/// Coins created by a spend, recovered by replaying its conditions. CAT
/// wraps are unwrapped first; negative amounts are melt markers and produce
/// no coin.
pub fn spend_additions(spend: &CoinSpend) -> Result<Vec<Coin>, ClimateError> {
    let mut a = Allocator::new();
    let mut puzzle = program_to_node(&mut a, &spend.puzzle_reveal).map_err(interp)?;
    let mut solution = program_to_node(&mut a, &spend.solution).map_err(interp)?;
    if let Some((_asset_id, inner)) = match_cat(&a, puzzle) {
        let (inner_solution, _rest) = as_pair(&a, solution)
            .ok_or_else(|| ProtocolViolation::MalformedCondition("CAT solution missing inner solution".into()))?;
        puzzle = inner;
        solution = inner_solution;
    }
    let output = run_puzzle(&mut a, puzzle, solution).map_err(interp)?;
    let conditions = proper_list(&a, output)
        .ok_or_else(|| ProtocolViolation::MalformedCondition("condition output is not a list".into()))?;

    let parent_id = spend.coin.coin_id();
    let mut additions = Vec::new();
    for condition in conditions {
        let Some(parts) = proper_list(&a, condition) else {
            continue;
        };
        if parts.len() < 3 {
            continue;
        }
        let opcode = as_atom(&a, parts[0]).and_then(|atom| atom_to_int(&atom));
        if opcode != Some(i128::from(CREATE_COIN)) {
            continue;
        }
        let Some(amount) = as_atom(&a, parts[2]).and_then(|atom| atom_to_int(&atom)) else {
            continue;
        };
        if amount < 0 {
            continue;
        }
        let target = as_atom(&a, parts[1])
            .and_then(|atom| Bytes32::try_from(atom.as_slice()).ok())
            .ok_or_else(|| ProtocolViolation::MalformedCondition("CREATE_COIN target is not 32 bytes".into()))?;
        additions.push(Coin::new(parent_id, target, amount as u64));
    }
    Ok(additions)
}

/// Decodes beneficiary metadata from a parsed TAIL spend. Keys are the
/// two-byte tags `bn` (name), `ba` (address), and `bp` (puzzle hash); any
/// other key is rejected so typos do not silently drop attribution.
pub fn parse_gateway_metadata(tail_spend: &CoinSpend) -> Result<BTreeMap<String, String>, ClimateError> {
    let coin_id = hex::encode(tail_spend.coin.coin_id());
    let malformed = |details: &str| ProtocolViolation::MalformedMetadata {
        coin_id: coin_id.clone(),
        details: details.to_string(),
    };

    let mut a = Allocator::new();
    let solution = program_to_node(&mut a, &tail_spend.solution).map_err(interp)?;
    let items = proper_list(&a, solution).ok_or_else(|| malformed("TAIL solution is not a list"))?;
    if items.len() < 2 {
        return Err(malformed("TAIL solution is missing the delegated solution").into());
    }
    let pairs = proper_list(&a, items[1]).ok_or_else(|| malformed("delegated solution is not a list"))?;

    let mut metadata = BTreeMap::new();
    for entry in pairs {
        let (key_node, value_node) = as_pair(&a, entry).ok_or_else(|| malformed("metadata entry is not a pair"))?;
        let key_bytes = as_atom(&a, key_node).ok_or_else(|| malformed("metadata key is not an atom"))?;
        let value_bytes = as_atom(&a, value_node).ok_or_else(|| malformed("metadata value is not an atom"))?;
        let key = String::from_utf8(key_bytes).map_err(|_| malformed("metadata key is not UTF-8"))?;
        let value = match key.as_str() {
            METADATA_KEY_BENEFICIARY_PUZZLE_HASH => format!("0x{}", hex::encode(&value_bytes)),
            METADATA_KEY_BENEFICIARY_NAME | METADATA_KEY_BENEFICIARY_ADDRESS => {
                String::from_utf8(value_bytes).map_err(|_| malformed("metadata value is not UTF-8"))?
            }
            _ => return Err(ProtocolViolation::UnknownMetadataKey(key).into()),
        };
        metadata.insert(key, value);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tail::{delegated_puzzle, tail_program};
    use crate::foundation::clvm::str_atom;
    use chia_bls::SecretKey;

    fn test_coin() -> Coin {
        Coin::new(Bytes32::from([3; 32]), Bytes32::from([4; 32]), 100)
    }

    fn root_key() -> PublicKey {
        SecretKey::from_seed(b"gateway module test seed #######").public_key()
    }

    fn quoted_conditions_spend(a: &mut Allocator, conditions: NodePtr) -> CoinSpend {
        let gateway = puzzles::gateway_node(a).unwrap();
        let solution = gateway_solution(a, conditions).unwrap();
        CoinSpend::new(test_coin(), node_to_program(a, gateway).unwrap(), node_to_program(a, solution).unwrap())
    }

    fn reveal_condition(a: &mut Allocator, mode: GatewayMode, metadata: &[(&str, &[u8])]) -> NodePtr {
        let key = root_key();
        let tail = tail_program(a, &key, Bytes32::from([9; 32])).unwrap();
        let key_arg = mode.requires_signature().then_some(&key);
        let delegated = delegated_puzzle(a, mode, puzzles::gateway_puzzle_hash(), key_arg).unwrap();
        let pairs: Vec<NodePtr> = metadata
            .iter()
            .map(|(k, v)| {
                let key_atom = alloc_atom(a, &str_atom(k)).unwrap();
                let value_atom = alloc_atom(a, v).unwrap();
                crate::foundation::clvm::alloc_pair(a, key_atom, value_atom).unwrap()
            })
            .collect();
        let delegated_solution = alloc_list(a, &pairs).unwrap();
        let tail_solution = alloc_list(a, &[delegated, delegated_solution]).unwrap();
        authority_reveal_condition(a, tail, tail_solution).unwrap()
    }

    #[test]
    fn parses_each_mode() {
        for mode in GatewayMode::ALL {
            let mut a = Allocator::new();
            let reveal = reveal_condition(&mut a, mode, &[]);
            let conditions = alloc_list(&mut a, &[reveal]).unwrap();
            let spend = quoted_conditions_spend(&mut a, conditions);
            let parsed = parse_gateway_spend(&spend, false).unwrap();
            assert_eq!(parsed.mode, mode);
            assert_eq!(parsed.tail_spend.coin, spend.coin);
        }
    }

    #[test]
    fn missing_reveal_is_rejected() {
        let mut a = Allocator::new();
        let payment = recipient_condition(&mut a, Bytes32::from([8; 32]), 10).unwrap();
        let conditions = alloc_list(&mut a, &[payment]).unwrap();
        let spend = quoted_conditions_spend(&mut a, conditions);
        let err = parse_gateway_spend(&spend, false).unwrap_err();
        assert!(matches!(err, ClimateError::Protocol(ProtocolViolation::NoAuthorityFound)));
    }

    #[test]
    fn duplicate_reveal_is_rejected() {
        let mut a = Allocator::new();
        let first = reveal_condition(&mut a, GatewayMode::Tokenization, &[]);
        let second = reveal_condition(&mut a, GatewayMode::Tokenization, &[]);
        let conditions = alloc_list(&mut a, &[first, second]).unwrap();
        let spend = quoted_conditions_spend(&mut a, conditions);
        let err = parse_gateway_spend(&spend, false).unwrap_err();
        assert!(matches!(err, ClimateError::Protocol(ProtocolViolation::DuplicateAuthority)));
    }

    #[test]
    fn foreign_tail_is_rejected() {
        let mut a = Allocator::new();
        let bogus_tail = puzzles::gateway_node(&mut a).unwrap();
        let nil = alloc_nil(&mut a).unwrap();
        let tail_solution = alloc_list(&mut a, &[nil, nil]).unwrap();
        let reveal = authority_reveal_condition(&mut a, bogus_tail, tail_solution).unwrap();
        let conditions = alloc_list(&mut a, &[reveal]).unwrap();
        let spend = quoted_conditions_spend(&mut a, conditions);
        let err = parse_gateway_spend(&spend, false).unwrap_err();
        assert!(matches!(err, ClimateError::Protocol(ProtocolViolation::UnknownAuthority { .. })));
    }

    #[test]
    fn metadata_round_trips() {
        let mut a = Allocator::new();
        let reveal = reveal_condition(
            &mut a,
            GatewayMode::PermissionlessRetirement,
            &[("bn", b"Alice"), ("ba", b"123 Main St"), ("bp", &[0xab; 32])],
        );
        let conditions = alloc_list(&mut a, &[reveal]).unwrap();
        let spend = quoted_conditions_spend(&mut a, conditions);
        let parsed = parse_gateway_spend(&spend, false).unwrap();
        let metadata = parse_gateway_metadata(&parsed.tail_spend).unwrap();
        assert_eq!(metadata.get("bn").map(String::as_str), Some("Alice"));
        assert_eq!(metadata.get("ba").map(String::as_str), Some("123 Main St"));
        assert_eq!(metadata.get("bp").map(String::as_str), Some(format!("0x{}", hex::encode([0xab; 32])).as_str()));
    }

    #[test]
    fn unknown_metadata_key_is_rejected() {
        let mut a = Allocator::new();
        let reveal = reveal_condition(&mut a, GatewayMode::PermissionlessRetirement, &[("zz", b"nope")]);
        let conditions = alloc_list(&mut a, &[reveal]).unwrap();
        let spend = quoted_conditions_spend(&mut a, conditions);
        let parsed = parse_gateway_spend(&spend, false).unwrap();
        let err = parse_gateway_metadata(&parsed.tail_spend).unwrap_err();
        assert!(matches!(err, ClimateError::Protocol(ProtocolViolation::UnknownMetadataKey(key)) if key == "zz"));
    }

    #[test]
    fn announcement_name_is_stable() {
        let mut a = Allocator::new();
        let payment = recipient_condition(&mut a, Bytes32::from([8; 32]), 10).unwrap();
        let conditions = alloc_list(&mut a, &[payment]).unwrap();
        let coin = test_coin();
        let first = gateway_announcement(&a, &coin, conditions);
        let second = gateway_announcement(&a, &coin, conditions);
        assert_eq!(first, second);
        assert_eq!(first.name(), second.name());
        assert_ne!(first.name(), Bytes32::default());
    }
}
