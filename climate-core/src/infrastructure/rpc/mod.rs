//! Node and wallet RPC seams.
//!
//! The wallet and scanner only ever talk to the ledger through these traits.
//! `MockFullNode` and `MockWallet` back the test suite: the node mock keeps a
//! coin table and replays spend conditions on ingest, so confirmation depth
//! and spend discovery behave like a real chain without one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chia_bls::Signature;
use chia_protocol::{Bytes32, Coin, CoinSpend, SpendBundle};
use chia_traits::Streamable;
use clvmr::Allocator;
use sha2::{Digest, Sha256};

use crate::domain::gateway::{spend_additions, Announcement};
use crate::domain::puzzles::cat_puzzle;
use crate::foundation::clvm::{alloc_atom, alloc_list, alloc_nil, alloc_pair, int_atom, node_to_program};
use crate::foundation::constants::{ASSERT_COIN_ANNOUNCEMENT, CREATE_COIN};
use crate::foundation::error::{ClimateError, ProviderError, WalletError};

#[derive(Clone, Debug)]
pub struct BlockchainState {
    pub peak_height: u64,
    pub synced: bool,
}

/// A coin with its confirmation bookkeeping. `spent_block_index` of zero
/// means unspent, matching the node's wire convention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinRecord {
    pub coin: Coin,
    pub confirmed_block_index: u64,
    pub spent_block_index: u64,
    pub timestamp: u64,
}

impl CoinRecord {
    pub fn is_spent(&self) -> bool {
        self.spent_block_index > 0
    }
}

#[derive(Clone, Debug)]
pub struct NetworkInfo {
    pub network_name: String,
    /// Genesis challenge, appended to every AGG_SIG_ME message.
    pub agg_sig_me_extra: Bytes32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalletKind {
    Standard,
    Cat,
}

impl WalletKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WalletKind::Standard => "standard",
            WalletKind::Cat => "cat",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Payment {
    pub puzzle_hash: Bytes32,
    pub amount: u64,
    pub memos: Vec<Vec<u8>>,
}

/// A funding request handed to the hosting wallet: pay these targets, attach
/// this fee, and refuse to finalize unless the listed announcements fire.
/// When `coins` is non-empty the wallet must spend exactly those coins.
#[derive(Clone, Debug, Default)]
pub struct TransactionRequest {
    pub wallet_id: u32,
    pub payments: Vec<Payment>,
    pub fee: u64,
    pub coin_announcements: Vec<Announcement>,
    pub coins: Vec<Coin>,
}

#[derive(Clone, Debug)]
pub struct SignedTransaction {
    pub name: Bytes32,
    pub spend_bundle: SpendBundle,
}

#[async_trait]
pub trait FullNodeRpc: Send + Sync {
    async fn get_blockchain_state(&self) -> Result<BlockchainState, ClimateError>;
    async fn get_network_info(&self) -> Result<NetworkInfo, ClimateError>;
    async fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: Bytes32,
        include_spent: bool,
        start_height: Option<u64>,
        end_height: Option<u64>,
    ) -> Result<Vec<CoinRecord>, ClimateError>;
    async fn get_puzzle_and_solution(&self, coin_id: Bytes32, height: u64) -> Result<CoinSpend, ClimateError>;
    async fn push_tx(&self, bundle: SpendBundle) -> Result<(), ClimateError>;
}

#[async_trait]
pub trait WalletRpc: Send + Sync {
    async fn wallet_kind(&self, wallet_id: u32) -> Result<WalletKind, ClimateError>;
    async fn get_next_puzzle_hash(&self, wallet_id: u32) -> Result<Bytes32, ClimateError>;
    /// Picks coins covering `amount` without reserving them.
    async fn select_coins(&self, wallet_id: u32, amount: u64) -> Result<Vec<Coin>, ClimateError>;
    async fn create_signed_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<Vec<SignedTransaction>, ClimateError>;
}

fn lock_err(operation: &str) -> ClimateError {
    ProviderError::storage(operation, "poisoned").into()
}

struct MockNodeInner {
    peak_height: u64,
    records: HashMap<Bytes32, CoinRecord>,
    spends: HashMap<Bytes32, CoinSpend>,
    pushed: Vec<SpendBundle>,
}

/// In-memory chain double. `ingest_bundle` confirms a bundle at a height:
/// every spent coin is marked spent and every addition becomes a fresh
/// unspent record, which is exactly what the scanner later reads back.
pub struct MockFullNode {
    inner: Mutex<MockNodeInner>,
    network: NetworkInfo,
}

impl MockFullNode {
    pub fn new(network: NetworkInfo) -> Self {
        Self {
            inner: Mutex::new(MockNodeInner {
                peak_height: 0,
                records: HashMap::new(),
                spends: HashMap::new(),
                pushed: Vec::new(),
            }),
            network,
        }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, MockNodeInner>, ClimateError> {
        self.inner.lock().map_err(|_| lock_err("mock node lock"))
    }

    pub fn set_peak(&self, height: u64) -> Result<(), ClimateError> {
        self.lock_inner()?.peak_height = height;
        Ok(())
    }

    pub fn add_coin(&self, coin: Coin, confirmed_height: u64) -> Result<(), ClimateError> {
        let mut inner = self.lock_inner()?;
        inner.records.insert(
            coin.coin_id(),
            CoinRecord { coin, confirmed_block_index: confirmed_height, spent_block_index: 0, timestamp: confirmed_height },
        );
        Ok(())
    }

    /// Confirms a bundle at `height` and advances the peak to it when it is
    /// beyond the current one.
    pub fn ingest_bundle(&self, bundle: &SpendBundle, height: u64) -> Result<(), ClimateError> {
        let mut staged = Vec::new();
        for spend in &bundle.coin_spends {
            let additions = spend_additions(spend)?;
            staged.push((spend.clone(), additions));
        }
        let mut inner = self.lock_inner()?;
        for (spend, additions) in staged {
            let coin_id = spend.coin.coin_id();
            let record = inner.records.entry(coin_id).or_insert(CoinRecord {
                coin: spend.coin.clone(),
                confirmed_block_index: height,
                spent_block_index: 0,
                timestamp: height,
            });
            record.spent_block_index = height;
            inner.spends.insert(coin_id, spend);
            for coin in additions {
                inner.records.entry(coin.coin_id()).or_insert(CoinRecord {
                    coin,
                    confirmed_block_index: height,
                    spent_block_index: 0,
                    timestamp: height,
                });
            }
        }
        if inner.peak_height < height {
            inner.peak_height = height;
        }
        Ok(())
    }

    pub fn pushed_bundles(&self) -> Result<Vec<SpendBundle>, ClimateError> {
        Ok(self.lock_inner()?.pushed.clone())
    }
}

#[async_trait]
impl FullNodeRpc for MockFullNode {
    async fn get_blockchain_state(&self) -> Result<BlockchainState, ClimateError> {
        let inner = self.lock_inner()?;
        Ok(BlockchainState { peak_height: inner.peak_height, synced: true })
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, ClimateError> {
        Ok(self.network.clone())
    }

    async fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: Bytes32,
        include_spent: bool,
        start_height: Option<u64>,
        end_height: Option<u64>,
    ) -> Result<Vec<CoinRecord>, ClimateError> {
        let inner = self.lock_inner()?;
        let mut records: Vec<CoinRecord> = inner
            .records
            .values()
            .filter(|record| record.coin.puzzle_hash == puzzle_hash)
            .filter(|record| include_spent || !record.is_spent())
            .filter(|record| start_height.map_or(true, |start| record.confirmed_block_index >= start))
            .filter(|record| end_height.map_or(true, |end| record.confirmed_block_index < end))
            .cloned()
            .collect();
        records.sort_by_key(|record| (record.confirmed_block_index, record.coin.coin_id()));
        Ok(records)
    }

    async fn get_puzzle_and_solution(&self, coin_id: Bytes32, _height: u64) -> Result<CoinSpend, ClimateError> {
        let inner = self.lock_inner()?;
        inner
            .spends
            .get(&coin_id)
            .cloned()
            .ok_or_else(|| ProviderError::rpc("get_puzzle_and_solution", format!("no spend for coin {}", hex::encode(coin_id))).into())
    }

    async fn push_tx(&self, bundle: SpendBundle) -> Result<(), ClimateError> {
        self.lock_inner()?.pushed.push(bundle);
        Ok(())
    }
}

/// One wallet the mock host manages: a coin pool plus, for CAT wallets, the
/// asset the pool is denominated in.
#[derive(Clone, Debug)]
pub struct MockWalletAccount {
    pub kind: WalletKind,
    pub puzzle_hash: Bytes32,
    pub asset_id: Option<Bytes32>,
    pub coins: Vec<Coin>,
}

struct MockWalletInner {
    accounts: HashMap<u32, MockWalletAccount>,
}

/// In-memory hosting wallet. Builds unsigned single-spend bundles whose
/// conditions literally state the requested payments, so downstream replay
/// (fee recomputation, mock-node ingest) sees exactly what was asked for.
pub struct MockWallet {
    inner: Mutex<MockWalletInner>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MockWalletInner { accounts: HashMap::new() }) }
    }

    pub fn add_account(&self, wallet_id: u32, account: MockWalletAccount) -> Result<(), ClimateError> {
        self.lock_inner()?.accounts.insert(wallet_id, account);
        Ok(())
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, MockWalletInner>, ClimateError> {
        self.inner.lock().map_err(|_| lock_err("mock wallet lock"))
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletRpc for MockWallet {
    async fn wallet_kind(&self, wallet_id: u32) -> Result<WalletKind, ClimateError> {
        let inner = self.lock_inner()?;
        inner
            .accounts
            .get(&wallet_id)
            .map(|account| account.kind)
            .ok_or_else(|| ProviderError::rpc("wallet_kind", format!("unknown wallet {wallet_id}")).into())
    }

    async fn get_next_puzzle_hash(&self, wallet_id: u32) -> Result<Bytes32, ClimateError> {
        let inner = self.lock_inner()?;
        inner
            .accounts
            .get(&wallet_id)
            .map(|account| account.puzzle_hash)
            .ok_or_else(|| ProviderError::rpc("get_next_puzzle_hash", format!("unknown wallet {wallet_id}")).into())
    }

    async fn select_coins(&self, wallet_id: u32, amount: u64) -> Result<Vec<Coin>, ClimateError> {
        let inner = self.lock_inner()?;
        let account = inner
            .accounts
            .get(&wallet_id)
            .ok_or_else(|| ProviderError::rpc("select_coins", format!("unknown wallet {wallet_id}")))?;
        let mut pool = account.coins.clone();
        pool.sort_by_key(|coin| std::cmp::Reverse(coin.amount));
        let mut selected = Vec::new();
        let mut selected_total: u64 = 0;
        for coin in pool {
            if selected_total >= amount && !selected.is_empty() {
                break;
            }
            selected_total += coin.amount;
            selected.push(coin);
        }
        if selected_total < amount || selected.is_empty() {
            return Err(WalletError::InsufficientBalance { required: amount }.into());
        }
        Ok(selected)
    }

    async fn create_signed_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<Vec<SignedTransaction>, ClimateError> {
        let mut inner = self.lock_inner()?;
        let account = inner
            .accounts
            .get_mut(&request.wallet_id)
            .ok_or_else(|| ProviderError::rpc("create_signed_transaction", format!("unknown wallet {}", request.wallet_id)))?;

        let payment_total: u64 = request.payments.iter().map(|payment| payment.amount).sum();
        let fee = if account.kind == WalletKind::Standard { request.fee } else { 0 };
        let required = payment_total + fee;

        let selected = if request.coins.is_empty() {
            account.coins.sort_by_key(|coin| std::cmp::Reverse(coin.amount));
            let mut selected = Vec::new();
            let mut selected_total: u64 = 0;
            while selected_total < required {
                let Some(coin) = account.coins.pop() else {
                    return Err(WalletError::InsufficientBalance { required }.into());
                };
                selected_total += coin.amount;
                selected.push(coin);
            }
            if selected.is_empty() {
                return Err(WalletError::InsufficientBalance { required: required.max(1) }.into());
            }
            selected
        } else {
            account.coins.retain(|coin| !request.coins.contains(coin));
            request.coins.clone()
        };

        let selected_total: u64 = selected.iter().map(|coin| coin.amount).sum();
        if selected_total < required {
            return Err(WalletError::InsufficientBalance { required }.into());
        }
        let change = selected_total - required;
        let spends = build_mock_spends(account, &request, &selected, change)?;
        let bundle = SpendBundle::new(spends, Signature::default());
        let name = bundle_name(&bundle)?;
        Ok(vec![SignedTransaction { name, spend_bundle: bundle }])
    }
}

fn build_mock_spends(
    account: &MockWalletAccount,
    request: &TransactionRequest,
    selected: &[Coin],
    change: u64,
) -> Result<Vec<CoinSpend>, ClimateError> {
    let interp = |err: &dyn std::fmt::Display| {
        ClimateError::from(crate::foundation::error::ProtocolViolation::interpreter("mock wallet", err))
    };
    let mut a = Allocator::new();

    let mut conditions = Vec::new();
    for payment in &request.payments {
        let opcode = alloc_atom(&mut a, &int_atom(i128::from(CREATE_COIN))).map_err(|e| interp(&e))?;
        let target = alloc_atom(&mut a, payment.puzzle_hash.as_ref()).map_err(|e| interp(&e))?;
        let amount = alloc_atom(&mut a, &int_atom(i128::from(payment.amount))).map_err(|e| interp(&e))?;
        let memo_nodes = payment
            .memos
            .iter()
            .map(|memo| alloc_atom(&mut a, memo))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| interp(&e))?;
        let memos = alloc_list(&mut a, &memo_nodes).map_err(|e| interp(&e))?;
        conditions.push(alloc_list(&mut a, &[opcode, target, amount, memos]).map_err(|e| interp(&e))?);
    }
    if change > 0 {
        let opcode = alloc_atom(&mut a, &int_atom(i128::from(CREATE_COIN))).map_err(|e| interp(&e))?;
        let target = alloc_atom(&mut a, account.puzzle_hash.as_ref()).map_err(|e| interp(&e))?;
        let amount = alloc_atom(&mut a, &int_atom(i128::from(change))).map_err(|e| interp(&e))?;
        conditions.push(alloc_list(&mut a, &[opcode, target, amount]).map_err(|e| interp(&e))?);
    }
    for announcement in &request.coin_announcements {
        let opcode = alloc_atom(&mut a, &int_atom(i128::from(ASSERT_COIN_ANNOUNCEMENT))).map_err(|e| interp(&e))?;
        let name = alloc_atom(&mut a, announcement.name().as_ref()).map_err(|e| interp(&e))?;
        conditions.push(alloc_list(&mut a, &[opcode, name]).map_err(|e| interp(&e))?);
    }

    let quote = alloc_atom(&mut a, &[1]).map_err(|e| interp(&e))?;
    let condition_list = alloc_list(&mut a, &conditions).map_err(|e| interp(&e))?;
    let lead_inner = alloc_pair(&mut a, quote, condition_list).map_err(|e| interp(&e))?;
    let quote = alloc_atom(&mut a, &[1]).map_err(|e| interp(&e))?;
    let empty = alloc_nil(&mut a).map_err(|e| interp(&e))?;
    let idle_inner = alloc_pair(&mut a, quote, empty).map_err(|e| interp(&e))?;

    let mut spends = Vec::new();
    for (position, coin) in selected.iter().enumerate() {
        let inner = if position == 0 { lead_inner } else { idle_inner };
        let (puzzle, solution) = match (account.kind, account.asset_id) {
            (WalletKind::Cat, Some(asset_id)) => {
                let wrapped = cat_puzzle(&mut a, asset_id, inner).map_err(|e| interp(&e))?;
                let nil = alloc_nil(&mut a).map_err(|e| interp(&e))?;
                let solution = alloc_list(&mut a, &[nil]).map_err(|e| interp(&e))?;
                (wrapped, solution)
            }
            _ => {
                let solution = alloc_nil(&mut a).map_err(|e| interp(&e))?;
                (inner, solution)
            }
        };
        spends.push(CoinSpend::new(
            coin.clone(),
            node_to_program(&a, puzzle).map_err(|e| interp(&e))?,
            node_to_program(&a, solution).map_err(|e| interp(&e))?,
        ));
    }
    Ok(spends)
}

fn bundle_name(bundle: &SpendBundle) -> Result<Bytes32, ClimateError> {
    let bytes = bundle
        .to_bytes()
        .map_err(|err| ProviderError::Serialization { format: "streamable".into(), details: err.to_string() })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(Bytes32::from(<[u8; 32]>::from(hasher.finalize())))
}
