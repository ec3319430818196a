//! Registry and client wallets.
//!
//! The two postures are distinct types. `RegistryWallet` holds the root
//! secret and the per-mode gateway secrets, so it can issue and countersign.
//! `ClientWallet` holds only public material plus the registry's published
//! mode authorizations, so a client deployment structurally cannot mint:
//! the operations that need secrets simply do not exist on it.

use std::collections::HashMap;
use std::sync::Arc;

use chia_bls::{sign, DerivableKey, PublicKey, SecretKey};
use chia_protocol::{Bytes32, Coin, CoinSpend, SpendBundle};
use clvmr::Allocator;
use log::info;
use zeroize::Zeroizing;

use crate::domain::keys::{master_secret_to_root_secret, root_secret_to_gateway_secret};
use crate::domain::puzzles::{cat_puzzle_hash, gateway_puzzle_hash, match_cat};
use crate::domain::signing::{sign_gateway_spend, SecretsByKey, SignaturesByKeyMessage};
use crate::domain::tail::{asset_id as derive_asset_id, authority_message, delegated_puzzle};
use crate::domain::transport::{encode_detokenization, parse_detokenization_request};
use crate::foundation::clvm::{program_to_node, tree_hash32};
use crate::foundation::constants::{
    METADATA_KEY_BENEFICIARY_ADDRESS, METADATA_KEY_BENEFICIARY_NAME, METADATA_KEY_BENEFICIARY_PUZZLE_HASH,
};
use crate::foundation::error::{ClimateError, ConfigurationError, ProtocolViolation, WalletError};
use crate::foundation::types::{AssetIndex, GatewayMode};
use crate::infrastructure::registry::{ModeAuthorization, TokenizedAsset};
use crate::infrastructure::rpc::{FullNodeRpc, Payment, SignedTransaction, TransactionRequest, WalletKind, WalletRpc};

/// Asset identity surface shared by both wallet postures.
pub trait ClimateAsset {
    fn asset_id(&self) -> Bytes32;
    fn index(&self) -> &AssetIndex;
    fn index_hash(&self) -> Bytes32;
    fn root_public_key(&self) -> PublicKey;

    fn mode_public_key(&self, mode: GatewayMode) -> PublicKey {
        self.root_public_key().derive_unhardened(mode.derivation_index())
    }
}

/// RPC handles and defaults shared by both wallet postures.
#[derive(Clone)]
pub struct WalletBase {
    pub node: Arc<dyn FullNodeRpc>,
    pub wallet: Arc<dyn WalletRpc>,
    pub default_fee: u64,
}

impl WalletBase {
    pub fn new(node: Arc<dyn FullNodeRpc>, wallet: Arc<dyn WalletRpc>, default_fee: u64) -> Self {
        Self { node, wallet, default_fee }
    }

    async fn agg_sig_extra(&self) -> Result<Bytes32, ClimateError> {
        Ok(self.node.get_network_info().await?.agg_sig_me_extra)
    }

    async fn expect_kind(&self, wallet_id: u32, expected: WalletKind) -> Result<(), ClimateError> {
        let actual = self.wallet.wallet_kind(wallet_id).await?;
        if actual != expected {
            return Err(WalletError::WrongWalletType {
                wallet_id,
                expected: expected.as_str().into(),
                actual: actual.as_str().into(),
            }
            .into());
        }
        Ok(())
    }
}

fn single_transaction(mut txs: Vec<SignedTransaction>) -> Result<SignedTransaction, ClimateError> {
    if txs.len() != 1 {
        return Err(WalletError::UnexpectedTransactions(format!("expected one transaction, got {}", txs.len())).into());
    }
    Ok(txs.remove(0))
}

#[derive(Debug)]
pub struct TokenizationOutcome {
    pub transaction_id: Bytes32,
    pub bundle: SpendBundle,
    pub gateway_coin: Coin,
    pub asset_id: Bytes32,
}

/// Issuing-side wallet. Holds the root secret and all mode secrets.
pub struct RegistryWallet {
    base: WalletBase,
    index: AssetIndex,
    index_hash: Bytes32,
    asset_id: Bytes32,
    root_secret: SecretKey,
    mode_secrets: HashMap<GatewayMode, SecretKey>,
}

impl RegistryWallet {
    pub fn new(base: WalletBase, master_secret: &SecretKey, index: AssetIndex) -> Result<Self, ClimateError> {
        let root_secret = master_secret_to_root_secret(master_secret);
        let index_hash = index.index_hash()?;
        let asset_id = derive_asset_id(&root_secret.public_key(), index_hash)?;
        let mode_secrets = GatewayMode::ALL
            .into_iter()
            .map(|mode| (mode, root_secret_to_gateway_secret(&root_secret, mode)))
            .collect();
        Ok(Self { base, index, index_hash, asset_id, root_secret, mode_secrets })
    }

    pub fn from_master_seed(base: WalletBase, seed: &[u8], index: AssetIndex) -> Result<Self, ClimateError> {
        let seed = Zeroizing::new(seed.to_vec());
        let master = SecretKey::from_seed(&seed);
        Self::new(base, &master, index)
    }

    fn mode_secret(&self, mode: GatewayMode) -> Result<&SecretKey, ClimateError> {
        self.mode_secrets.get(&mode).ok_or_else(|| ConfigurationError::MissingKey(mode).into())
    }

    fn secrets_for(&self, modes: &[GatewayMode]) -> Result<SecretsByKey, ClimateError> {
        let mut secrets = SecretsByKey::new();
        secrets.insert(self.root_secret.public_key().to_bytes(), self.root_secret.clone());
        for mode in modes {
            let secret = self.mode_secret(*mode)?;
            secrets.insert(secret.public_key().to_bytes(), secret.clone());
        }
        Ok(secrets)
    }

    /// Detached root signatures over the client-exercisable delegated
    /// puzzles, for publication alongside the asset's registry record.
    pub fn mode_authorizations(&self) -> Result<HashMap<GatewayMode, ModeAuthorization>, ClimateError> {
        let mut authorizations = HashMap::new();
        for mode in [GatewayMode::Detokenization, GatewayMode::PermissionlessRetirement] {
            let mut a = Allocator::new();
            let key = mode.requires_signature().then(|| self.mode_public_key(mode));
            let delegated = delegated_puzzle(&mut a, mode, gateway_puzzle_hash(), key.as_ref())?;
            let delegated_puzzle_hash = tree_hash32(&a, delegated);
            let message = authority_message(&mut a, self.index_hash, delegated)?;
            let signature = sign(&self.root_secret, message.as_ref());
            authorizations.insert(mode, ModeAuthorization { delegated_puzzle_hash, signature });
        }
        Ok(authorizations)
    }

    /// Mints `amount` units to `to_puzzle_hash` from the standard wallet
    /// `wallet_id`, fully signs the bundle, and submits it.
    pub async fn send_tokenization(
        &self,
        wallet_id: u32,
        to_puzzle_hash: Bytes32,
        amount: u64,
        fee: Option<u64>,
    ) -> Result<TokenizationOutcome, ClimateError> {
        self.base.expect_kind(wallet_id, WalletKind::Standard).await?;
        let fee = fee.unwrap_or(self.base.default_fee);
        let coins = self.base.wallet.select_coins(wallet_id, amount + fee).await?;
        let origin =
            coins.first().cloned().ok_or(WalletError::InsufficientBalance { required: amount + fee })?;

        let plan = super::spend::build_gateway_spend(&super::spend::GatewayParams {
            mode: GatewayMode::Tokenization,
            origin_coin: origin,
            root_public_key: self.root_public_key(),
            mode_public_key: Some(self.mode_public_key(GatewayMode::Tokenization)),
            index_hash: self.index_hash,
            asset_id: self.asset_id,
            amount,
            recipient: Some(to_puzzle_hash),
            lineage: None,
            metadata: Vec::new(),
        })?;

        let tx = single_transaction(
            self.base
                .wallet
                .create_signed_transaction(TransactionRequest {
                    wallet_id,
                    payments: vec![Payment {
                        puzzle_hash: plan.gateway_coin.puzzle_hash,
                        amount,
                        memos: Vec::new(),
                    }],
                    fee,
                    coin_announcements: vec![plan.announcement],
                    coins,
                })
                .await?,
        )?;

        let extra = self.base.agg_sig_extra().await?;
        let secrets = self.secrets_for(&[GatewayMode::Tokenization])?;
        let gateway_signature =
            sign_gateway_spend(&plan.coin_spend, &extra, &secrets, &SignaturesByKeyMessage::new(), false)?;

        let mut coin_spends = tx.spend_bundle.coin_spends.clone();
        coin_spends.push(plan.coin_spend.clone());
        let signature = &tx.spend_bundle.aggregated_signature + &gateway_signature;
        let bundle = SpendBundle::new(coin_spends, signature);
        self.base.node.push_tx(bundle.clone()).await?;
        info!("submitted tokenization of {amount} units of asset {}", hex::encode(self.asset_id));

        Ok(TokenizationOutcome {
            transaction_id: tx.name,
            bundle,
            gateway_coin: plan.gateway_coin,
            asset_id: self.asset_id,
        })
    }

    /// Countersigns a holder's detokenization hand-off and submits it. The
    /// holder's own obligations are already satisfied inside the bundle;
    /// this adds only the detokenization mode signature.
    pub async fn sign_and_send_detokenization(&self, content: &str) -> Result<SpendBundle, ClimateError> {
        let request = parse_detokenization_request(content)?;
        if request.asset_id != self.asset_id {
            return Err(ConfigurationError::Invalid(format!(
                "request is for asset {}, this wallet manages {}",
                hex::encode(request.asset_id),
                hex::encode(self.asset_id)
            ))
            .into());
        }

        let extra = self.base.agg_sig_extra().await?;
        let mut secrets = SecretsByKey::new();
        let detok_secret = self.mode_secret(GatewayMode::Detokenization)?;
        secrets.insert(detok_secret.public_key().to_bytes(), detok_secret.clone());
        let counter_signature =
            sign_gateway_spend(&request.gateway_coin_spend, &extra, &secrets, &SignaturesByKeyMessage::new(), true)?;

        let signature = &request.bundle.aggregated_signature + &counter_signature;
        let bundle = SpendBundle::new(request.bundle.coin_spends.clone(), signature);
        self.base.node.push_tx(bundle.clone()).await?;
        info!(
            "submitted detokenization of {} units of asset {} (fee {})",
            request.amount,
            hex::encode(self.asset_id),
            request.fee
        );
        Ok(bundle)
    }
}

impl ClimateAsset for RegistryWallet {
    fn asset_id(&self) -> Bytes32 {
        self.asset_id
    }

    fn index(&self) -> &AssetIndex {
        &self.index
    }

    fn index_hash(&self) -> Bytes32 {
        self.index_hash
    }

    fn root_public_key(&self) -> PublicKey {
        self.root_secret.public_key()
    }
}

/// Beneficiary attribution attached to a permissionless retirement. When no
/// puzzle hash is given the holder's own next puzzle hash is recorded.
#[derive(Clone, Debug, Default)]
pub struct RetirementBeneficiary {
    pub name: Option<String>,
    pub address: Option<String>,
    pub puzzle_hash: Option<Bytes32>,
}

/// Holder-side wallet. Public material only; melt authority comes from the
/// registry's published mode authorizations.
pub struct ClientWallet {
    base: WalletBase,
    asset: TokenizedAsset,
}

struct MeltPlan {
    funding: SignedTransaction,
    plan: super::spend::GatewayPlan,
}

impl ClientWallet {
    pub fn new(base: WalletBase, asset: TokenizedAsset) -> Self {
        Self { base, asset }
    }

    /// Detached signatures satisfying the root obligation for `mode`, keyed
    /// the way the signing layer looks them up.
    fn precomputed_for(&self, mode: GatewayMode) -> Result<SignaturesByKeyMessage, ClimateError> {
        let authorization = self
            .asset
            .authorization(mode)
            .ok_or(ConfigurationError::MissingField { mode, field: "authorization" })?;
        let mut a = Allocator::new();
        let key = mode.requires_signature().then(|| self.mode_public_key(mode));
        let delegated = delegated_puzzle(&mut a, mode, gateway_puzzle_hash(), key.as_ref())?;
        if tree_hash32(&a, delegated) != authorization.delegated_puzzle_hash {
            return Err(ConfigurationError::Invalid(format!(
                "published {mode} authorization does not match the derived delegated puzzle"
            ))
            .into());
        }
        let message = authority_message(&mut a, self.asset.index_hash, delegated)?;
        let mut precomputed = SignaturesByKeyMessage::new();
        precomputed.insert(
            (self.asset.root_public_key.to_bytes(), message.as_ref().to_vec()),
            authorization.signature.clone(),
        );
        Ok(precomputed)
    }

    /// Builds the funding transaction and the gateway melt spend for
    /// `amount` units out of CAT wallet `wallet_id`.
    async fn build_melt(
        &self,
        wallet_id: u32,
        amount: u64,
        fee: u64,
        mode: GatewayMode,
        metadata: Vec<(String, Vec<u8>)>,
    ) -> Result<MeltPlan, ClimateError> {
        self.base.expect_kind(wallet_id, WalletKind::Cat).await?;
        let coins = self.base.wallet.select_coins(wallet_id, amount).await?;
        let origin = coins.first().cloned().ok_or(WalletError::InsufficientBalance { required: amount })?;
        let gateway_outer_hash = cat_puzzle_hash(self.asset.asset_id, gateway_puzzle_hash());

        let request = TransactionRequest {
            wallet_id,
            payments: vec![Payment { puzzle_hash: gateway_outer_hash, amount, memos: Vec::new() }],
            fee,
            coin_announcements: Vec::new(),
            coins: coins.clone(),
        };

        // Draft once to learn the origin's inner puzzle, which the melt
        // lineage proof must name.
        let draft = single_transaction(self.base.wallet.create_signed_transaction(request.clone()).await?)?;
        let origin_spend = draft
            .spend_bundle
            .coin_spends
            .iter()
            .find(|spend| spend.coin == origin)
            .cloned()
            .ok_or_else(|| WalletError::UnexpectedTransactions("wallet did not spend the origin coin".into()))?;
        let from_inner_hash = origin_inner_hash(&origin_spend)?;

        let plan = super::spend::build_gateway_spend(&super::spend::GatewayParams {
            mode,
            origin_coin: origin.clone(),
            root_public_key: self.asset.root_public_key,
            mode_public_key: mode.requires_signature().then(|| self.mode_public_key(mode)),
            index_hash: self.asset.index_hash,
            asset_id: self.asset.asset_id,
            amount,
            recipient: None,
            lineage: Some(super::spend::CatLineage {
                parent_parent_id: origin.parent_coin_info,
                inner_puzzle_hash: from_inner_hash,
                amount: origin.amount,
            }),
            metadata,
        })?;

        let funding = single_transaction(
            self.base
                .wallet
                .create_signed_transaction(TransactionRequest {
                    coin_announcements: vec![plan.announcement],
                    ..request
                })
                .await?,
        )?;
        Ok(MeltPlan { funding, plan })
    }

    /// Produces the partially signed detokenization hand-off string. The
    /// root obligation is satisfied from the published authorization; the
    /// mode signature is left for the registry.
    pub async fn create_detokenization_request(
        &self,
        wallet_id: u32,
        amount: u64,
        fee: Option<u64>,
    ) -> Result<String, ClimateError> {
        let fee = fee.unwrap_or(self.base.default_fee);
        let precomputed = self.precomputed_for(GatewayMode::Detokenization)?;
        let melt = self.build_melt(wallet_id, amount, fee, GatewayMode::Detokenization, Vec::new()).await?;

        let extra = self.base.agg_sig_extra().await?;
        let partial = sign_gateway_spend(&melt.plan.coin_spend, &extra, &SecretsByKey::new(), &precomputed, true)?;

        let mut coin_spends = melt.funding.spend_bundle.coin_spends.clone();
        coin_spends.push(melt.plan.coin_spend.clone());
        let signature = &melt.funding.spend_bundle.aggregated_signature + &partial;
        let bundle = SpendBundle::new(coin_spends, signature);
        info!("prepared detokenization request for {amount} units of asset {}", hex::encode(self.asset.asset_id));
        encode_detokenization(&bundle)
    }

    /// Retires `amount` units with beneficiary attribution and submits the
    /// bundle directly; no registry involvement is needed.
    pub async fn send_permissionless_retirement(
        &self,
        wallet_id: u32,
        amount: u64,
        beneficiary: RetirementBeneficiary,
        fee: Option<u64>,
    ) -> Result<SpendBundle, ClimateError> {
        let fee = fee.unwrap_or(self.base.default_fee);
        let precomputed = self.precomputed_for(GatewayMode::PermissionlessRetirement)?;

        let puzzle_hash = match beneficiary.puzzle_hash {
            Some(hash) => hash,
            None => self.base.wallet.get_next_puzzle_hash(wallet_id).await?,
        };
        let mut metadata = Vec::new();
        if let Some(name) = &beneficiary.name {
            metadata.push((METADATA_KEY_BENEFICIARY_NAME.to_string(), name.as_bytes().to_vec()));
        }
        if let Some(address) = &beneficiary.address {
            metadata.push((METADATA_KEY_BENEFICIARY_ADDRESS.to_string(), address.as_bytes().to_vec()));
        }
        metadata.push((METADATA_KEY_BENEFICIARY_PUZZLE_HASH.to_string(), puzzle_hash.as_ref().to_vec()));

        let melt = self.build_melt(wallet_id, amount, fee, GatewayMode::PermissionlessRetirement, metadata).await?;

        let extra = self.base.agg_sig_extra().await?;
        let gateway_signature =
            sign_gateway_spend(&melt.plan.coin_spend, &extra, &SecretsByKey::new(), &precomputed, false)?;

        let mut coin_spends = melt.funding.spend_bundle.coin_spends.clone();
        coin_spends.push(melt.plan.coin_spend.clone());
        let signature = &melt.funding.spend_bundle.aggregated_signature + &gateway_signature;
        let bundle = SpendBundle::new(coin_spends, signature);
        self.base.node.push_tx(bundle.clone()).await?;
        info!("submitted retirement of {amount} units of asset {}", hex::encode(self.asset.asset_id));
        Ok(bundle)
    }
}

impl ClimateAsset for ClientWallet {
    fn asset_id(&self) -> Bytes32 {
        self.asset.asset_id
    }

    fn index(&self) -> &AssetIndex {
        &self.asset.index
    }

    fn index_hash(&self) -> Bytes32 {
        self.asset.index_hash
    }

    fn root_public_key(&self) -> PublicKey {
        self.asset.root_public_key
    }
}

fn origin_inner_hash(origin_spend: &CoinSpend) -> Result<Bytes32, ClimateError> {
    let mut a = Allocator::new();
    let puzzle = program_to_node(&mut a, &origin_spend.puzzle_reveal)
        .map_err(|err| ProtocolViolation::interpreter("origin reveal", err))?;
    let (_asset_id, inner) = match_cat(&a, puzzle)
        .ok_or_else(|| ProtocolViolation::MalformedCondition("origin reveal is not a CAT".into()))?;
    Ok(tree_hash32(&a, inner))
}

/// Builds a client-side asset descriptor from a registry wallet's own
/// material, as a registry operator does when smoke-testing a deployment.
pub fn asset_for_client(registry: &RegistryWallet) -> Result<TokenizedAsset, ClimateError> {
    let authorizations = registry.mode_authorizations()?;
    let mut detokenization = None;
    let mut permissionless_retirement = None;
    for (mode, authorization) in authorizations {
        match mode {
            GatewayMode::Detokenization => detokenization = Some(authorization),
            GatewayMode::PermissionlessRetirement => permissionless_retirement = Some(authorization),
            GatewayMode::Tokenization => {}
        }
    }
    Ok(TokenizedAsset {
        asset_id: registry.asset_id(),
        index: registry.index().clone(),
        index_hash: registry.index_hash(),
        root_public_key: registry.root_public_key(),
        detokenization,
        permissionless_retirement,
    })
}
