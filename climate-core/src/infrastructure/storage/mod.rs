//! Activity persistence seam.
//!
//! The scanner is the only writer; the observer API is the main reader.
//! Inserts are idempotent on coin id so re-scanning a window (the lookback
//! does this every cycle) never duplicates rows.

mod memory;

pub use memory::MemoryStorage;

use std::collections::BTreeMap;

use chia_protocol::Bytes32;

use crate::foundation::error::ClimateError;
use crate::foundation::types::{AssetIndex, GatewayMode};

/// One confirmed gateway supply change.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityRecord {
    pub coin_id: Bytes32,
    pub asset_id: Bytes32,
    pub index: AssetIndex,
    pub mode: GatewayMode,
    pub amount: u64,
    pub height: u64,
    pub timestamp: u64,
    /// Beneficiary attribution, present on retirements.
    pub beneficiary_name: Option<String>,
    pub beneficiary_address: Option<String>,
    pub beneficiary_puzzle_hash: Option<Bytes32>,
    /// Decoded delegated-solution tags as carried on chain, `bp` rendered
    /// as `0x…` hex.
    pub metadata: BTreeMap<String, String>,
}

/// Scanner cursor plus the last observed chain tip. One row; the window
/// scanner writes both after every fully persisted window, the tip tracker
/// refreshes only the peak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanState {
    pub current_height: u64,
    pub peak_height: u64,
}

/// Row selection criteria. Height bounds are inclusive.
#[derive(Clone, Debug, Default)]
pub struct ActivityFilter {
    pub org_uid: Option<String>,
    pub warehouse_project_id: Option<String>,
    pub vintage_year: Option<u32>,
    pub sequence_num: Option<u32>,
    pub mode: Option<GatewayMode>,
    pub asset_id: Option<Bytes32>,
    pub coin_id: Option<Bytes32>,
    pub min_height: Option<u64>,
    pub max_height: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 25 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

pub trait Storage: Send + Sync {
    /// Inserts new activities, skipping coin ids already present. Returns
    /// the number actually inserted.
    fn insert_activities(&self, records: &[ActivityRecord]) -> Result<usize, ClimateError>;

    fn update_scan_state(&self, state: ScanState) -> Result<(), ClimateError>;

    fn scan_state(&self) -> Result<Option<ScanState>, ClimateError>;

    /// Filtered page of activities ordered by height then coin id, plus the
    /// total match count before pagination.
    fn select_activities(
        &self,
        filter: &ActivityFilter,
        page: Pagination,
        order: SortOrder,
    ) -> Result<(Vec<ActivityRecord>, usize), ClimateError>;
}
