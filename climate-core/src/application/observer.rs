//! Read-only activity surfaces: the storage-backed query the scanner feeds,
//! and a direct chain parse for callers who want fresh, unfiltered history
//! for one asset without waiting on a scan cycle.

use std::sync::Arc;

use crate::foundation::error::ClimateError;
use crate::infrastructure::registry::TokenizedAsset;
use crate::infrastructure::rpc::FullNodeRpc;
use crate::infrastructure::storage::{ActivityFilter, ActivityRecord, Pagination, SortOrder, Storage};

use super::scanner::{classify_gateway_record, gateway_puzzle_hash_for_asset};

#[derive(Clone, Debug)]
pub struct ActivityPage {
    pub activities: Vec<ActivityRecord>,
    pub total: usize,
}

pub struct ObserverWallet {
    node: Arc<dyn FullNodeRpc>,
    storage: Arc<dyn Storage>,
}

impl ObserverWallet {
    pub fn new(node: Arc<dyn FullNodeRpc>, storage: Arc<dyn Storage>) -> Self {
        Self { node, storage }
    }

    pub fn get_activities(
        &self,
        filter: &ActivityFilter,
        page: Pagination,
        order: SortOrder,
    ) -> Result<ActivityPage, ClimateError> {
        let (activities, total) = self.storage.select_activities(filter, page, order)?;
        Ok(ActivityPage { activities, total })
    }

    /// Parses gateway activity for `asset` straight off the chain, spent
    /// coins only, with no confirmation-depth gate. Heights are half-open
    /// `[start, end)` over the coin's confirmation height.
    pub async fn get_chain_activities(
        &self,
        asset: &TokenizedAsset,
        start_height: Option<u64>,
        end_height: Option<u64>,
    ) -> Result<Vec<ActivityRecord>, ClimateError> {
        let outer_hash = gateway_puzzle_hash_for_asset(asset.asset_id);
        let coin_records =
            self.node.get_coin_records_by_puzzle_hash(outer_hash, true, start_height, end_height).await?;
        let mut activities = Vec::new();
        for coin_record in coin_records {
            if !coin_record.is_spent() {
                continue;
            }
            let spend = self
                .node
                .get_puzzle_and_solution(coin_record.coin.coin_id(), coin_record.spent_block_index)
                .await?;
            if let Some(activity) = classify_gateway_record(asset, &coin_record, &spend) {
                activities.push(activity);
            }
        }
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::types::{AssetIndex, GatewayMode};
    use crate::infrastructure::rpc::{MockFullNode, NetworkInfo};
    use crate::infrastructure::storage::MemoryStorage;
    use chia_protocol::Bytes32;
    use std::collections::BTreeMap;

    #[test]
    fn pages_through_storage() {
        let storage = MemoryStorage::new();
        let records: Vec<ActivityRecord> = (0..5u8)
            .map(|i| ActivityRecord {
                coin_id: Bytes32::from([i; 32]),
                asset_id: Bytes32::from([0xaa; 32]),
                index: AssetIndex::new("org", "project", 2017, 0),
                mode: GatewayMode::Tokenization,
                amount: 10,
                height: u64::from(i),
                timestamp: u64::from(i),
                beneficiary_name: None,
                beneficiary_address: None,
                beneficiary_puzzle_hash: None,
                metadata: BTreeMap::new(),
            })
            .collect();
        storage.insert_activities(&records).unwrap();

        let node = Arc::new(MockFullNode::new(NetworkInfo {
            network_name: "testnet".into(),
            agg_sig_me_extra: Bytes32::from([0xcc; 32]),
        }));
        let observer = ObserverWallet::new(node, Arc::new(storage));
        let page = observer
            .get_activities(
                &ActivityFilter::default(),
                Pagination { offset: 0, limit: 2 },
                SortOrder::Descending,
            )
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.activities.len(), 2);
        assert_eq!(page.activities[0].height, 4);
    }
}
