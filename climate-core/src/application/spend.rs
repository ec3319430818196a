//! Gateway spend assembly.
//!
//! Every supply change runs through one CAT-wrapped gateway coin created by
//! the caller's funding transaction and spent in the same bundle. This
//! module turns a mode plus an asset into that coin spend: the authority
//! reveal, the signature bindings, and the announcement the funding spend
//! asserts so neither half can confirm without the other.

use chia_bls::PublicKey;
use chia_protocol::{Bytes32, Coin, CoinSpend};
use clvmr::{Allocator, NodePtr};

use crate::domain::gateway::{
    agg_sig_me_condition, agg_sig_unsafe_condition, authority_reveal_condition, create_coin_announcement_condition,
    gateway_solution, recipient_condition, Announcement,
};
use crate::domain::puzzles::{self, cat_puzzle};
use crate::domain::tail::{authority_message, delegated_puzzle, tail_program};
use crate::foundation::clvm::{alloc_atom, alloc_list, alloc_nil, alloc_pair, int_atom, node_to_program, tree_hash32};
use crate::foundation::error::{ClimateError, ConfigurationError, ProtocolViolation};
use crate::foundation::types::GatewayMode;

/// Proof that the holder's origin coin was itself a valid CAT, required when
/// melting.
#[derive(Clone, Copy, Debug)]
pub struct CatLineage {
    pub parent_parent_id: Bytes32,
    pub inner_puzzle_hash: Bytes32,
    pub amount: u64,
}

pub struct GatewayParams {
    pub mode: GatewayMode,
    /// Coin whose spend creates the gateway coin.
    pub origin_coin: Coin,
    pub root_public_key: PublicKey,
    pub mode_public_key: Option<PublicKey>,
    pub index_hash: Bytes32,
    pub asset_id: Bytes32,
    pub amount: u64,
    /// Issuance target (recipient inner puzzle hash). Mint only.
    pub recipient: Option<Bytes32>,
    /// Origin CAT lineage. Melt only.
    pub lineage: Option<CatLineage>,
    /// Beneficiary tags carried in the delegated solution.
    pub metadata: Vec<(String, Vec<u8>)>,
}

pub struct GatewayPlan {
    pub gateway_coin: Coin,
    pub coin_spend: CoinSpend,
    /// Announcement the funding spend must assert.
    pub announcement: Announcement,
    pub delegated_puzzle_hash: Bytes32,
}

fn interp(err: impl std::fmt::Display) -> ClimateError {
    ProtocolViolation::interpreter("gateway assembly", err.to_string()).into()
}

pub fn build_gateway_spend(params: &GatewayParams) -> Result<GatewayPlan, ClimateError> {
    let mut a = Allocator::new();

    let gateway_inner = puzzles::gateway_node(&mut a).map_err(interp)?;
    let outer = cat_puzzle(&mut a, params.asset_id, gateway_inner).map_err(interp)?;
    let outer_hash = tree_hash32(&a, outer);
    let gateway_coin = Coin::new(params.origin_coin.coin_id(), outer_hash, params.amount);

    let tail = tail_program(&mut a, &params.root_public_key, params.index_hash)?;
    let delegated =
        delegated_puzzle(&mut a, params.mode, puzzles::gateway_puzzle_hash(), params.mode_public_key.as_ref())?;
    let delegated_puzzle_hash = tree_hash32(&a, delegated);

    let mut kv_nodes = Vec::new();
    for (key, value) in &params.metadata {
        let key_atom = alloc_atom(&mut a, key.as_bytes()).map_err(interp)?;
        let value_atom = alloc_atom(&mut a, value).map_err(interp)?;
        kv_nodes.push(alloc_pair(&mut a, key_atom, value_atom).map_err(interp)?);
    }
    let delegated_solution = alloc_list(&mut a, &kv_nodes).map_err(interp)?;
    let tail_solution = alloc_list(&mut a, &[delegated, delegated_solution]).map_err(interp)?;

    let mut conditions = vec![authority_reveal_condition(&mut a, tail, tail_solution)?];
    if let Some(recipient) = params.recipient {
        conditions.push(recipient_condition(&mut a, recipient, params.amount)?);
    }
    let message = authority_message(&mut a, params.index_hash, delegated)?;
    conditions.push(agg_sig_unsafe_condition(&mut a, &params.root_public_key, message.as_ref())?);
    if params.mode.requires_signature() {
        let key = params.mode_public_key.as_ref().ok_or(ConfigurationError::MissingKey(params.mode))?;
        conditions.push(agg_sig_me_condition(&mut a, key, delegated_puzzle_hash.as_ref())?);
    }

    // The announcement binds everything above it; it cannot bind itself.
    let core = alloc_list(&mut a, &conditions).map_err(interp)?;
    let announcement_message = tree_hash32(&a, core);
    conditions.push(create_coin_announcement_condition(&mut a, announcement_message.as_ref())?);
    let full = alloc_list(&mut a, &conditions).map_err(interp)?;
    let inner_solution = gateway_solution(&mut a, full)?;

    let solution = cat_solution(&mut a, params, &gateway_coin, outer_hash, inner_solution)?;
    let coin_spend = CoinSpend::new(
        gateway_coin.clone(),
        node_to_program(&a, outer).map_err(interp)?,
        node_to_program(&a, solution).map_err(interp)?,
    );
    let announcement = Announcement { coin_id: gateway_coin.coin_id(), message: announcement_message };
    Ok(GatewayPlan { gateway_coin, coin_spend, announcement, delegated_puzzle_hash })
}

/// Single-coin CAT solution for the gateway spend. Issuance has no lineage
/// and no delta; melt proves the origin's lineage and burns the full amount
/// through `extra_delta`.
fn cat_solution(
    a: &mut Allocator,
    params: &GatewayParams,
    gateway_coin: &Coin,
    outer_hash: Bytes32,
    inner_solution: NodePtr,
) -> Result<NodePtr, ClimateError> {
    let lineage_node = match &params.lineage {
        Some(proof) => {
            let parent = alloc_atom(a, proof.parent_parent_id.as_ref()).map_err(interp)?;
            let inner = alloc_atom(a, proof.inner_puzzle_hash.as_ref()).map_err(interp)?;
            let amount = alloc_atom(a, &int_atom(i128::from(proof.amount))).map_err(interp)?;
            alloc_list(a, &[parent, inner, amount]).map_err(interp)?
        }
        None => alloc_nil(a).map_err(interp)?,
    };
    let coin_id = gateway_coin.coin_id();
    let prev_coin_id = alloc_atom(a, coin_id.as_ref()).map_err(interp)?;

    let parent = alloc_atom(a, gateway_coin.parent_coin_info.as_ref()).map_err(interp)?;
    let outer = alloc_atom(a, outer_hash.as_ref()).map_err(interp)?;
    let amount = alloc_atom(a, &int_atom(i128::from(gateway_coin.amount))).map_err(interp)?;
    let this_coin_info = alloc_list(a, &[parent, outer, amount]).map_err(interp)?;

    let parent = alloc_atom(a, gateway_coin.parent_coin_info.as_ref()).map_err(interp)?;
    let inner_hash = alloc_atom(a, puzzles::gateway_puzzle_hash().as_ref()).map_err(interp)?;
    let amount = alloc_atom(a, &int_atom(i128::from(gateway_coin.amount))).map_err(interp)?;
    let next_coin_proof = alloc_list(a, &[parent, inner_hash, amount]).map_err(interp)?;

    let prev_subtotal = alloc_nil(a).map_err(interp)?;
    let extra_delta = match params.mode {
        GatewayMode::Tokenization => alloc_nil(a).map_err(interp)?,
        GatewayMode::Detokenization | GatewayMode::PermissionlessRetirement => {
            alloc_atom(a, &int_atom(-i128::from(params.amount))).map_err(interp)?
        }
    };

    alloc_list(a, &[inner_solution, lineage_node, prev_coin_id, this_coin_info, next_coin_proof, prev_subtotal, extra_delta])
        .map_err(interp)
}
