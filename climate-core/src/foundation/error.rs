use thiserror::Error;

use crate::foundation::types::GatewayMode;

/// Malformed or non-conforming on-chain data. Fatal to the single spend
/// being parsed, never to a whole scan pass.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("no authority reveal found in spend conditions")]
    NoAuthorityFound,

    #[error("multiple authority reveals found in spend conditions")]
    DuplicateAuthority,

    #[error("revealed authority program does not match the TAIL template: {mod_hash}")]
    UnknownAuthority { mod_hash: String },

    #[error("delegated puzzle does not match any known mode template: {mod_hash}")]
    UnknownMode { mod_hash: String },

    #[error("malformed condition: {0}")]
    MalformedCondition(String),

    #[error("malformed metadata for coin {coin_id}: {details}")]
    MalformedMetadata { coin_id: String, details: String },

    #[error("unknown metadata key '{0}'")]
    UnknownMetadataKey(String),

    #[error("interpreter failure during {operation}: {details}")]
    Interpreter { operation: String, details: String },
}

/// Caller supplied an incomplete or inconsistent request. Rejected before
/// any ledger mutation.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("mode {0:?} requires a gateway public key")]
    MissingKey(GatewayMode),

    #[error("mode {mode:?} requires `{field}`")]
    MissingField { mode: GatewayMode, field: &'static str },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Missing key material during signing. Recoverable by supplying more key
/// material or setting `allow_missing`.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("cannot sign for key {public_key} and message {message}")]
    MissingKey { public_key: String, message: String },
}

/// Request-level wallet failures. Recoverable by adjusting the request.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient balance: no coins cover {required}")]
    InsufficientBalance { required: u64 },

    #[error("wrong wallet type for wallet {wallet_id}: expected {expected}, got {actual}")]
    WrongWalletType { wallet_id: u32, expected: String, actual: String },

    #[error("wrong gateway mode: expected {expected:?}, got {actual:?}")]
    WrongMode { expected: GatewayMode, actual: GatewayMode },

    #[error("wallet produced an unexpected transaction set: {0}")]
    UnexpectedTransactions(String),
}

/// Malformed transport string. The caller must obtain a fresh one.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid detokenization encoding: {0}")]
    InvalidEncoding(String),

    #[error("no gateway spend found in detokenization bundle")]
    MissingGatewaySpend,
}

/// RPC or storage failure, including timeouts. The periodic scanner retries
/// on its own schedule; wallet callers see it immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("node RPC error during {operation}: {details}")]
    Rpc { operation: String, details: String },

    #[error("storage error during {operation}: {details}")]
    Storage { operation: String, details: String },

    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("{format} serialization error: {details}")]
    Serialization { format: String, details: String },
}

#[derive(Debug, Error)]
pub enum ClimateError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, ClimateError>;

impl ClimateError {
    /// Stable machine-readable code for the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ClimateError::Protocol(_) => "protocol_violation",
            ClimateError::Configuration(_) => "configuration_error",
            ClimateError::Signing(_) => "signing_error",
            ClimateError::Wallet(_) => "wallet_error",
            ClimateError::Transport(_) => "transport_error",
            ClimateError::Provider(_) => "provider_error",
        }
    }
}

impl ProviderError {
    pub fn rpc(operation: impl Into<String>, details: impl ToString) -> Self {
        ProviderError::Rpc { operation: operation.into(), details: details.to_string() }
    }

    pub fn storage(operation: impl Into<String>, details: impl ToString) -> Self {
        ProviderError::Storage { operation: operation.into(), details: details.to_string() }
    }
}

impl ProtocolViolation {
    pub fn interpreter(operation: impl Into<String>, details: impl ToString) -> Self {
        ProtocolViolation::Interpreter { operation: operation.into(), details: details.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_render() {
        let err = ClimateError::from(ProtocolViolation::NoAuthorityFound);
        assert!(err.to_string().contains("authority"));
        assert_eq!(err.code(), "protocol_violation");

        let err = ClimateError::from(WalletError::InsufficientBalance { required: 105 });
        assert!(err.to_string().contains("105"));
        assert_eq!(err.code(), "wallet_error");

        let err = ClimateError::from(ConfigurationError::MissingKey(GatewayMode::Tokenization));
        assert_eq!(err.code(), "configuration_error");
    }
}
