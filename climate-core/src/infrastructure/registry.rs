//! Registry metadata seam.
//!
//! The scanner can only attribute on-chain activity to assets the registry
//! says exist, and clients can only exercise a mode the registry has
//! published an authorization for: the root key's detached signature over
//! that mode's delegated puzzle. `CadtProvider` pulls unit documents from a
//! CADT API node, following its pagination and, unless configured to scan
//! everything, restricting to the home organization's units.
//! `StaticProvider` serves a fixed asset list for tests and air-gapped
//! deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chia_bls::{PublicKey, Signature};
use chia_protocol::Bytes32;
use log::{debug, warn};
use serde::Deserialize;

use crate::foundation::error::{ClimateError, ProviderError};
use crate::foundation::types::{AssetIndex, GatewayMode};

/// A root-key signature authorizing one gateway mode for one asset.
#[derive(Clone, Debug)]
pub struct ModeAuthorization {
    /// Tree hash of the mode's delegated puzzle.
    pub delegated_puzzle_hash: Bytes32,
    /// Root signature over the authority message for that puzzle.
    pub signature: Signature,
}

/// One registry-issued asset, as needed for chain-side attribution and
/// client-side spending.
#[derive(Clone, Debug)]
pub struct TokenizedAsset {
    pub asset_id: Bytes32,
    pub index: AssetIndex,
    pub index_hash: Bytes32,
    pub root_public_key: PublicKey,
    pub detokenization: Option<ModeAuthorization>,
    pub permissionless_retirement: Option<ModeAuthorization>,
}

impl TokenizedAsset {
    pub fn authorization(&self, mode: GatewayMode) -> Option<&ModeAuthorization> {
        match mode {
            GatewayMode::Tokenization => None,
            GatewayMode::Detokenization => self.detokenization.as_ref(),
            GatewayMode::PermissionlessRetirement => self.permissionless_retirement.as_ref(),
        }
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn tokenized_assets(&self) -> Result<Vec<TokenizedAsset>, ClimateError>;

    async fn asset(&self, asset_id: Bytes32) -> Result<Option<TokenizedAsset>, ClimateError> {
        Ok(self.tokenized_assets().await?.into_iter().find(|asset| asset.asset_id == asset_id))
    }
}

/// Fixed asset list.
#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    assets: Vec<TokenizedAsset>,
}

impl StaticProvider {
    pub fn new(assets: Vec<TokenizedAsset>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl MetadataProvider for StaticProvider {
    async fn tokenized_assets(&self) -> Result<Vec<TokenizedAsset>, ClimateError> {
        Ok(self.assets.clone())
    }
}

#[derive(Debug, Deserialize)]
struct OrganizationDoc {
    #[serde(rename = "isHome", default)]
    is_home: bool,
}

#[derive(Debug, Deserialize)]
struct UnitsPage {
    #[serde(rename = "pageCount")]
    page_count: u32,
    data: Vec<UnitDoc>,
}

#[derive(Debug, Deserialize)]
struct UnitDoc {
    #[serde(rename = "orgUid")]
    org_uid: String,
    #[serde(rename = "marketplaceIdentifier")]
    marketplace_identifier: Option<String>,
    token: Option<TokenDoc>,
}

#[derive(Debug, Deserialize)]
struct TokenDoc {
    org_uid: String,
    warehouse_project_id: String,
    vintage_year: u32,
    sequence_num: u32,
    public_key: String,
    index: String,
    detokenization: Option<ModeDoc>,
    permissionless_retirement: Option<ModeDoc>,
}

#[derive(Debug, Deserialize)]
struct ModeDoc {
    mod_hash: String,
    signature: String,
}

/// Metadata provider backed by a CADT API node.
pub struct CadtProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Include units from every organization, not just the home one.
    scan_all: bool,
}

impl CadtProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, scan_all: bool) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), api_key, scan_all }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClimateError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::rpc("cadt request", err))?
            .error_for_status()
            .map_err(|err| ProviderError::rpc("cadt request", err))?;
        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::Serialization { format: "cadt".into(), details: err.to_string() }.into())
    }

    async fn home_org_uids(&self) -> Result<Vec<String>, ClimateError> {
        let organizations: HashMap<String, OrganizationDoc> = self.get_json("/v1/organizations").await?;
        Ok(organizations.into_iter().filter(|(_, org)| org.is_home).map(|(uid, _)| uid).collect())
    }
}

#[async_trait]
impl MetadataProvider for CadtProvider {
    async fn tokenized_assets(&self) -> Result<Vec<TokenizedAsset>, ClimateError> {
        let home_orgs = if self.scan_all { Vec::new() } else { self.home_org_uids().await? };

        let mut assets = Vec::new();
        let mut page = 1u32;
        loop {
            let units: UnitsPage = self.get_json(&format!("/v1/units?page={page}&limit=100")).await?;
            for unit in &units.data {
                if !self.scan_all && !home_orgs.contains(&unit.org_uid) {
                    continue;
                }
                match convert_unit(unit) {
                    Ok(Some(asset)) => assets.push(asset),
                    Ok(None) => {}
                    Err(details) => {
                        warn!("skipping malformed unit document from org {}: {details}", unit.org_uid);
                    }
                }
            }
            if page >= units.page_count {
                break;
            }
            page += 1;
        }
        debug!("registry reported {} tokenized assets", assets.len());
        Ok(assets)
    }
}

/// `Ok(None)` for units that simply are not tokenized; `Err` for units that
/// claim to be but carry an unusable token block.
fn convert_unit(unit: &UnitDoc) -> Result<Option<TokenizedAsset>, String> {
    let Some(identifier) = &unit.marketplace_identifier else {
        return Ok(None);
    };
    let Some(token) = &unit.token else {
        return Ok(None);
    };
    if token.detokenization.is_none() && token.permissionless_retirement.is_none() {
        return Err("token block enables neither detokenization nor permissionless retirement".into());
    }
    let asset_id = parse_bytes32(identifier).map_err(|err| format!("marketplaceIdentifier: {err}"))?;
    let index_hash = parse_bytes32(&token.index).map_err(|err| format!("index: {err}"))?;
    let root_public_key = parse_public_key(&token.public_key)?;
    let detokenization =
        token.detokenization.as_ref().map(convert_mode).transpose().map_err(|err| format!("detokenization: {err}"))?;
    let permissionless_retirement = token
        .permissionless_retirement
        .as_ref()
        .map(convert_mode)
        .transpose()
        .map_err(|err| format!("permissionless_retirement: {err}"))?;
    Ok(Some(TokenizedAsset {
        asset_id,
        index: AssetIndex::new(
            token.org_uid.clone(),
            token.warehouse_project_id.clone(),
            token.vintage_year,
            token.sequence_num,
        ),
        index_hash,
        root_public_key,
        detokenization,
        permissionless_retirement,
    }))
}

fn convert_mode(doc: &ModeDoc) -> Result<ModeAuthorization, String> {
    let delegated_puzzle_hash = parse_bytes32(&doc.mod_hash).map_err(|err| format!("mod_hash: {err}"))?;
    let signature = parse_signature(&doc.signature)?;
    Ok(ModeAuthorization { delegated_puzzle_hash, signature })
}

fn parse_bytes32(value: &str) -> Result<Bytes32, String> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped).map_err(|err| err.to_string())?;
    Bytes32::try_from(bytes.as_slice()).map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
}

fn parse_public_key(value: &str) -> Result<PublicKey, String> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped).map_err(|err| err.to_string())?;
    let array: [u8; 48] = bytes.as_slice().try_into().map_err(|_| format!("expected 48 bytes, got {}", bytes.len()))?;
    PublicKey::from_bytes(&array).map_err(|err| format!("invalid public key: {err:?}"))
}

fn parse_signature(value: &str) -> Result<Signature, String> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped).map_err(|err| err.to_string())?;
    let array: [u8; 96] = bytes.as_slice().try_into().map_err(|_| format!("expected 96 bytes, got {}", bytes.len()))?;
    Signature::from_bytes(&array).map_err(|err| format!("invalid signature: {err:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chia_bls::{sign, SecretKey};

    fn sample_unit(tokenized: bool) -> UnitDoc {
        let secret = SecretKey::from_seed(b"registry test seed #############");
        let signature = sign(&secret, b"authorization");
        UnitDoc {
            org_uid: "org-1".into(),
            marketplace_identifier: tokenized.then(|| format!("0x{}", hex::encode([0x42; 32]))),
            token: tokenized.then(|| TokenDoc {
                org_uid: "org-1".into(),
                warehouse_project_id: "project-1".into(),
                vintage_year: 2017,
                sequence_num: 0,
                public_key: hex::encode(secret.public_key().to_bytes()),
                index: hex::encode([0x24; 32]),
                detokenization: Some(ModeDoc {
                    mod_hash: hex::encode([0x33; 32]),
                    signature: hex::encode(signature.to_bytes()),
                }),
                permissionless_retirement: None,
            }),
        }
    }

    #[test]
    fn tokenized_unit_converts() {
        let asset = convert_unit(&sample_unit(true)).unwrap().unwrap();
        assert_eq!(asset.asset_id, Bytes32::from([0x42; 32]));
        assert_eq!(asset.index.warehouse_project_id, "project-1");
        assert!(asset.authorization(GatewayMode::Detokenization).is_some());
        assert!(asset.authorization(GatewayMode::PermissionlessRetirement).is_none());
        assert!(asset.authorization(GatewayMode::Tokenization).is_none());
    }

    #[test]
    fn unit_documents_deserialize_from_cadt_json() {
        let secret = SecretKey::from_seed(b"registry test seed #############");
        let public_key = hex::encode(secret.public_key().to_bytes());
        let signature = hex::encode(sign(&secret, b"authorization").to_bytes());
        let json = serde_json::json!({
            "pageCount": 3,
            "data": [{
                "orgUid": "org-1",
                "marketplaceIdentifier": format!("0x{}", hex::encode([0x42u8; 32])),
                "token": {
                    "org_uid": "org-1",
                    "warehouse_project_id": "project-1",
                    "vintage_year": 2017,
                    "sequence_num": 0,
                    "public_key": public_key,
                    "index": hex::encode([0x24u8; 32]),
                    "detokenization": { "mod_hash": hex::encode([0x33u8; 32]), "signature": signature },
                    "permissionless_retirement": null
                }
            }, {
                "orgUid": "org-2",
                "marketplaceIdentifier": null,
                "token": null
            }]
        });
        let page: UnitsPage = serde_json::from_value(json).unwrap();
        assert_eq!(page.page_count, 3);
        assert_eq!(page.data.len(), 2);
        let asset = convert_unit(&page.data[0]).unwrap().unwrap();
        assert_eq!(asset.asset_id, Bytes32::from([0x42; 32]));
        assert!(convert_unit(&page.data[1]).unwrap().is_none());
    }

    #[test]
    fn untokenized_unit_is_skipped() {
        assert!(convert_unit(&sample_unit(false)).unwrap().is_none());
    }

    #[test]
    fn token_without_modes_is_malformed() {
        let mut unit = sample_unit(true);
        if let Some(token) = &mut unit.token {
            token.detokenization = None;
        }
        assert!(convert_unit(&unit).is_err());
    }

    #[test]
    fn truncated_signature_is_malformed() {
        let mut unit = sample_unit(true);
        if let Some(token) = &mut unit.token {
            if let Some(mode) = &mut token.detokenization {
                mode.signature = hex::encode([0u8; 12]);
            }
        }
        assert!(convert_unit(&unit).is_err());
    }

    #[tokio::test]
    async fn static_provider_finds_assets_by_id() {
        let asset = convert_unit(&sample_unit(true)).unwrap().unwrap();
        let provider = StaticProvider::new(vec![asset.clone()]);
        let found = provider.asset(asset.asset_id).await.unwrap().unwrap();
        assert_eq!(found.asset_id, asset.asset_id);
        assert!(provider.asset(Bytes32::from([0; 32])).await.unwrap().is_none());
    }
}
