use chia_protocol::Bytes32;
use serde::{Deserialize, Serialize};

use crate::foundation::clvm::{int_atom, str_atom, tree_hash_of_list};
use crate::foundation::error::{ClimateError, ProtocolViolation};

/// The three gateway transaction modes. Closed set: every spend of a climate
/// token passes through exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    Tokenization,
    Detokenization,
    PermissionlessRetirement,
}

impl GatewayMode {
    pub const ALL: [GatewayMode; 3] =
        [GatewayMode::Tokenization, GatewayMode::Detokenization, GatewayMode::PermissionlessRetirement];

    /// Signed integer discriminant used when classifying transaction records.
    pub fn discriminant(self) -> i8 {
        match self {
            GatewayMode::Tokenization => -1,
            GatewayMode::Detokenization => 1,
            GatewayMode::PermissionlessRetirement => 0,
        }
    }

    pub fn from_discriminant(value: i8) -> Option<GatewayMode> {
        match value {
            -1 => Some(GatewayMode::Tokenization),
            1 => Some(GatewayMode::Detokenization),
            0 => Some(GatewayMode::PermissionlessRetirement),
            _ => None,
        }
    }

    /// Per-mode unhardened child index under the root secret.
    pub fn derivation_index(self) -> u32 {
        match self {
            GatewayMode::Tokenization => 0,
            GatewayMode::Detokenization => 1,
            GatewayMode::PermissionlessRetirement => 2,
        }
    }

    /// Whether the mode's delegated puzzle binds a gateway key signature.
    pub fn requires_signature(self) -> bool {
        !matches!(self, GatewayMode::PermissionlessRetirement)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatewayMode::Tokenization => "tokenization",
            GatewayMode::Detokenization => "detokenization",
            GatewayMode::PermissionlessRetirement => "permissionless_retirement",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<GatewayMode> {
        GatewayMode::ALL.into_iter().find(|mode| mode.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifying tuple of one climate token asset. Created once at mint time,
/// never mutated. `sequence_num` disambiguates re-issuance of the same
/// logical project/vintage under the same root key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetIndex {
    pub org_uid: String,
    pub warehouse_project_id: String,
    pub vintage_year: u32,
    pub sequence_num: u32,
}

impl AssetIndex {
    pub fn new(org_uid: impl Into<String>, warehouse_project_id: impl Into<String>, vintage_year: u32, sequence_num: u32) -> Self {
        Self { org_uid: org_uid.into(), warehouse_project_id: warehouse_project_id.into(), vintage_year, sequence_num }
    }

    /// Canonical hash of the index tuple: the value-tree hash of the list
    /// `(org_uid warehouse_project_id vintage_year sequence_num)`. The sole
    /// input distinguishing one asset from another under a root key.
    pub fn index_hash(&self) -> Result<Bytes32, ClimateError> {
        tree_hash_of_list(&[
            str_atom(&self.org_uid),
            str_atom(&self.warehouse_project_id),
            int_atom(i128::from(self.vintage_year)),
            int_atom(i128::from(self.sequence_num)),
        ])
        .map_err(|err| ProtocolViolation::interpreter("index hash", err).into())
    }
}
