//! Periodic chain scanner.
//!
//! Walks gateway coin history window by window, classifies every
//! sufficiently confirmed spend, and persists one activity per coin. The
//! cursor deliberately trails the tip: each window ends at most at the peak
//! and the cursor advances only past blocks deep enough to be final, with a
//! lookback tail re-scanned every cycle to pick up assets the registry
//! published late. Re-scanning is safe because inserts are idempotent.

use std::sync::Arc;

use chia_protocol::{Bytes32, CoinSpend};
use log::{debug, error, info, warn};

use crate::domain::gateway::{parse_gateway_metadata, parse_gateway_spend};
use crate::domain::puzzles::{cat_puzzle_hash, gateway_puzzle_hash};
use crate::foundation::constants::{
    METADATA_KEY_BENEFICIARY_ADDRESS, METADATA_KEY_BENEFICIARY_NAME, METADATA_KEY_BENEFICIARY_PUZZLE_HASH,
};
use crate::foundation::error::ClimateError;
use crate::infrastructure::config::ScannerSettings;
use crate::infrastructure::registry::{MetadataProvider, TokenizedAsset};
use crate::infrastructure::rpc::{CoinRecord, FullNodeRpc};
use crate::infrastructure::storage::{ActivityRecord, ScanState, Storage};

#[derive(Clone, Copy, Debug)]
pub struct ScannerConfig {
    pub block_start: u64,
    pub block_range: u64,
    pub min_depth: u64,
    pub lookback_depth: u64,
}

impl From<&ScannerSettings> for ScannerConfig {
    fn from(settings: &ScannerSettings) -> Self {
        Self {
            block_start: settings.block_start,
            block_range: settings.block_range,
            min_depth: settings.min_depth,
            lookback_depth: settings.lookback_depth,
        }
    }
}

/// One scan pass: blocks `[start, end)` to examine, and where the cursor
/// lands afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: u64,
    pub end: u64,
    pub next_cursor: u64,
}

impl ScanWindow {
    /// Whether the window was truncated by `block_range`, meaning another
    /// pass is needed to reach the peak.
    pub fn is_partial(&self, peak: u64) -> bool {
        self.end < peak + 1
    }
}

/// Computes the next window from the cursor and the current peak. `None`
/// when there is nothing to examine. The cursor never moves backwards and
/// never lands within `min_depth + lookback_depth` of the window end, which
/// is what makes the lookback re-scan happen.
pub fn next_window(current: u64, peak: u64, config: &ScannerConfig) -> Option<ScanWindow> {
    if peak < current {
        return None;
    }
    let end = current.saturating_add(config.block_range).min(peak + 1);
    if end <= current {
        return None;
    }
    let floor = config.min_depth.saturating_add(config.lookback_depth);
    let target = end.saturating_sub(floor);
    Some(ScanWindow { start: current, end, next_cursor: current.max(target) })
}

/// Owns everything one scanning deployment needs. A tick that arrives while
/// a cycle is still running is skipped, never queued.
pub struct ActivityScanner {
    node: Arc<dyn FullNodeRpc>,
    provider: Arc<dyn MetadataProvider>,
    storage: Arc<dyn Storage>,
    config: ScannerConfig,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl ActivityScanner {
    pub fn new(
        node: Arc<dyn FullNodeRpc>,
        provider: Arc<dyn MetadataProvider>,
        storage: Arc<dyn Storage>,
        config: ScannerConfig,
    ) -> Self {
        Self { node, provider, storage, config, cycle_lock: tokio::sync::Mutex::new(()) }
    }

    /// Reports and persists the current peak, for the fast tip-tracking
    /// timer. The cursor is left where the window scanner put it.
    pub async fn track_tip(&self) -> Result<u64, ClimateError> {
        let state = self.node.get_blockchain_state().await?;
        let current = self
            .storage
            .scan_state()?
            .map(|scan_state| scan_state.current_height)
            .unwrap_or(self.config.block_start);
        self.storage.update_scan_state(ScanState { current_height: current, peak_height: state.peak_height })?;
        debug!("chain peak at {}", state.peak_height);
        Ok(state.peak_height)
    }

    /// Runs windows until the scanner has caught up with the peak. Returns
    /// the number of newly recorded activities. A cycle already in progress
    /// makes this a no-op; the next timer tick picks the work up.
    pub async fn run_scan_cycle(&self) -> Result<usize, ClimateError> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("scan cycle already running, skipping this tick");
            return Ok(0);
        };
        let mut total_inserted = 0;
        loop {
            let state = self.node.get_blockchain_state().await?;
            if !state.synced {
                warn!("node is not synced, deferring scan");
                break;
            }
            let current = self
                .storage
                .scan_state()?
                .map(|scan_state| scan_state.current_height)
                .unwrap_or(self.config.block_start);
            let Some(window) = next_window(current, state.peak_height, &self.config) else {
                break;
            };
            total_inserted += self.scan_window(&window, state.peak_height).await?;
            self.storage.update_scan_state(ScanState {
                current_height: window.next_cursor,
                peak_height: state.peak_height,
            })?;
            if !window.is_partial(state.peak_height) {
                break;
            }
            // A lookback floor wider than the block range pins the cursor;
            // finish this cycle rather than spin on the same window.
            if window.next_cursor <= current {
                warn!("scan cursor cannot advance past {current}; check block_range against lookback_depth");
                break;
            }
        }
        if total_inserted > 0 {
            info!("recorded {total_inserted} new activities");
        }
        Ok(total_inserted)
    }

    async fn scan_window(&self, window: &ScanWindow, peak: u64) -> Result<usize, ClimateError> {
        debug!("scanning blocks [{}, {})", window.start, window.end);
        let assets = self.provider.tokenized_assets().await?;
        let mut records = Vec::new();
        for asset in &assets {
            // One asset's node trouble must not starve the others; storage
            // failures below still abort the pass.
            if let Err(err) = self.scan_asset(asset, window, peak, &mut records).await {
                error!("scan of asset {} failed: {err}", hex::encode(asset.asset_id));
            }
        }
        self.storage.insert_activities(&records)
    }

    async fn scan_asset(
        &self,
        asset: &TokenizedAsset,
        window: &ScanWindow,
        peak: u64,
        records: &mut Vec<ActivityRecord>,
    ) -> Result<(), ClimateError> {
        let gateway_outer_hash = cat_puzzle_hash(asset.asset_id, gateway_puzzle_hash());
        let coin_records = self
            .node
            .get_coin_records_by_puzzle_hash(gateway_outer_hash, true, Some(window.start), Some(window.end))
            .await?;

        for coin_record in coin_records {
            if !coin_record.is_spent() {
                continue;
            }
            // Confirmation depth gate: a spend too close to the tip may
            // still be reorged out, so leave it for a later pass.
            if peak.saturating_sub(coin_record.spent_block_index) + 1 < self.config.min_depth {
                continue;
            }
            let coin_id = coin_record.coin.coin_id();
            let spend = self.node.get_puzzle_and_solution(coin_id, coin_record.spent_block_index).await?;
            if let Some(record) = classify_gateway_record(asset, &coin_record, &spend) {
                records.push(record);
            }
        }
        Ok(())
    }
}

/// Classifies one spent gateway coin into an activity. Non-conforming spends
/// and undecodable metadata are logged and dropped rather than failing the
/// caller's whole pass.
pub fn classify_gateway_record(
    asset: &TokenizedAsset,
    coin_record: &CoinRecord,
    spend: &CoinSpend,
) -> Option<ActivityRecord> {
    let coin_id = coin_record.coin.coin_id();
    let parsed = match parse_gateway_spend(spend, true) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("skipping unclassifiable spend of coin {}: {err}", hex::encode(coin_id));
            return None;
        }
    };
    let metadata = match parse_gateway_metadata(&parsed.tail_spend) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("skipping coin {} with undecodable metadata: {err}", hex::encode(coin_id));
            return None;
        }
    };
    let beneficiary_puzzle_hash = metadata
        .get(METADATA_KEY_BENEFICIARY_PUZZLE_HASH)
        .and_then(|value| hex::decode(value.trim_start_matches("0x")).ok())
        .and_then(|bytes| Bytes32::try_from(bytes.as_slice()).ok());
    Some(ActivityRecord {
        coin_id,
        asset_id: asset.asset_id,
        index: asset.index.clone(),
        mode: parsed.mode,
        amount: coin_record.coin.amount,
        height: coin_record.spent_block_index,
        timestamp: coin_record.timestamp,
        beneficiary_name: metadata.get(METADATA_KEY_BENEFICIARY_NAME).cloned(),
        beneficiary_address: metadata.get(METADATA_KEY_BENEFICIARY_ADDRESS).cloned(),
        beneficiary_puzzle_hash,
        metadata,
    })
}

pub fn gateway_puzzle_hash_for_asset(asset_id: Bytes32) -> Bytes32 {
    cat_puzzle_hash(asset_id, gateway_puzzle_hash())
}
