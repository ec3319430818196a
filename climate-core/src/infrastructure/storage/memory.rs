use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chia_protocol::Bytes32;

use crate::foundation::error::{ClimateError, ProviderError};

use super::{ActivityFilter, ActivityRecord, Pagination, ScanState, SortOrder, Storage};

struct MemoryInner {
    activities: HashMap<Bytes32, ActivityRecord>,
    scan_state: Option<ScanState>,
}

/// In-memory [`Storage`] used by tests and single-process deployments.
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryInner { activities: HashMap::new(), scan_state: None })) }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, MemoryInner>, ClimateError> {
        self.inner.lock().map_err(|_| ProviderError::storage("memory storage lock", "poisoned").into())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStorage {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

fn matches(filter: &ActivityFilter, record: &ActivityRecord) -> bool {
    filter.org_uid.as_ref().map_or(true, |org| record.index.org_uid == *org)
        && filter.warehouse_project_id.as_ref().map_or(true, |project| record.index.warehouse_project_id == *project)
        && filter.vintage_year.map_or(true, |year| record.index.vintage_year == year)
        && filter.sequence_num.map_or(true, |sequence| record.index.sequence_num == sequence)
        && filter.mode.map_or(true, |mode| record.mode == mode)
        && filter.asset_id.map_or(true, |asset_id| record.asset_id == asset_id)
        && filter.coin_id.map_or(true, |coin_id| record.coin_id == coin_id)
        && filter.min_height.map_or(true, |height| record.height >= height)
        && filter.max_height.map_or(true, |height| record.height <= height)
}

impl Storage for MemoryStorage {
    fn insert_activities(&self, records: &[ActivityRecord]) -> Result<usize, ClimateError> {
        let mut inner = self.lock_inner()?;
        let mut inserted = 0;
        for record in records {
            if inner.activities.contains_key(&record.coin_id) {
                continue;
            }
            inner.activities.insert(record.coin_id, record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    fn update_scan_state(&self, state: ScanState) -> Result<(), ClimateError> {
        self.lock_inner()?.scan_state = Some(state);
        Ok(())
    }

    fn scan_state(&self) -> Result<Option<ScanState>, ClimateError> {
        Ok(self.lock_inner()?.scan_state)
    }

    fn select_activities(
        &self,
        filter: &ActivityFilter,
        page: Pagination,
        order: SortOrder,
    ) -> Result<(Vec<ActivityRecord>, usize), ClimateError> {
        let inner = self.lock_inner()?;
        let mut rows: Vec<ActivityRecord> =
            inner.activities.values().filter(|record| matches(filter, record)).cloned().collect();
        rows.sort_by_key(|record| (record.height, record.coin_id));
        if order == SortOrder::Descending {
            rows.reverse();
        }
        let total = rows.len();
        let rows = rows.into_iter().skip(page.offset).take(page.limit).collect();
        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::types::{AssetIndex, GatewayMode};
    use std::collections::BTreeMap;

    fn record(id: u8, height: u64, mode: GatewayMode) -> ActivityRecord {
        ActivityRecord {
            coin_id: Bytes32::from([id; 32]),
            asset_id: Bytes32::from([0xaa; 32]),
            index: AssetIndex::new("org", "project", 2017, 0),
            mode,
            amount: 10,
            height,
            timestamp: height,
            beneficiary_name: None,
            beneficiary_address: None,
            beneficiary_puzzle_hash: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn duplicate_coin_ids_are_skipped() {
        let storage = MemoryStorage::new();
        let first = vec![record(1, 5, GatewayMode::Tokenization), record(2, 6, GatewayMode::Detokenization)];
        assert_eq!(storage.insert_activities(&first).unwrap(), 2);
        let again = vec![record(2, 6, GatewayMode::Detokenization), record(3, 7, GatewayMode::Tokenization)];
        assert_eq!(storage.insert_activities(&again).unwrap(), 1);
        let (_, total) = storage
            .select_activities(&ActivityFilter::default(), Pagination::default(), SortOrder::Ascending)
            .unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn filter_and_order() {
        let storage = MemoryStorage::new();
        storage
            .insert_activities(&[
                record(1, 5, GatewayMode::Tokenization),
                record(2, 9, GatewayMode::PermissionlessRetirement),
                record(3, 7, GatewayMode::PermissionlessRetirement),
            ])
            .unwrap();

        let filter = ActivityFilter { mode: Some(GatewayMode::PermissionlessRetirement), ..Default::default() };
        let (rows, total) = storage.select_activities(&filter, Pagination::default(), SortOrder::Descending).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].height, 9);
        assert_eq!(rows[1].height, 7);
    }

    #[test]
    fn index_and_height_bound_filters() {
        let storage = MemoryStorage::new();
        storage
            .insert_activities(&[
                record(1, 5, GatewayMode::Tokenization),
                record(2, 9, GatewayMode::PermissionlessRetirement),
                record(3, 7, GatewayMode::Detokenization),
            ])
            .unwrap();

        let bounded = ActivityFilter { min_height: Some(6), max_height: Some(8), ..Default::default() };
        let (rows, total) = storage.select_activities(&bounded, Pagination::default(), SortOrder::Ascending).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].height, 7);

        let by_index = ActivityFilter {
            org_uid: Some("org".into()),
            warehouse_project_id: Some("project".into()),
            vintage_year: Some(2017),
            sequence_num: Some(0),
            ..Default::default()
        };
        let (_, total) = storage.select_activities(&by_index, Pagination::default(), SortOrder::Ascending).unwrap();
        assert_eq!(total, 3);

        let foreign = ActivityFilter { org_uid: Some("someone-else".into()), ..Default::default() };
        let (_, total) = storage.select_activities(&foreign, Pagination::default(), SortOrder::Ascending).unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn pagination_windows() {
        let storage = MemoryStorage::new();
        storage
            .insert_activities(&(0..10u8).map(|i| record(i, u64::from(i), GatewayMode::Tokenization)).collect::<Vec<_>>())
            .unwrap();
        let page = Pagination { offset: 4, limit: 3 };
        let (rows, total) = storage.select_activities(&ActivityFilter::default(), page, SortOrder::Ascending).unwrap();
        assert_eq!(total, 10);
        assert_eq!(rows.iter().map(|r| r.height).collect::<Vec<_>>(), vec![4, 5, 6]);
    }

    #[test]
    fn scan_state_round_trips() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.scan_state().unwrap(), None);
        let state = ScanState { current_height: 1_500_000, peak_height: 1_600_000 };
        storage.update_scan_state(state).unwrap();
        assert_eq!(storage.scan_state().unwrap(), Some(state));
    }
}
