//! Key derivation for the climate token authority.
//!
//! The root secret lives on its own unhardened path so it never collides
//! with ordinary spending keys, and each gateway mode gets its own child so
//! compromising one mode's operational key exposes neither the root nor the
//! other modes.

use chia_bls::{DerivableKey, SecretKey};

use crate::foundation::constants::ROOT_DERIVATION_PATH;
use crate::foundation::types::GatewayMode;

pub fn master_secret_to_root_secret(master: &SecretKey) -> SecretKey {
    ROOT_DERIVATION_PATH.iter().fold(master.clone(), |secret, index| secret.derive_unhardened(*index))
}

pub fn root_secret_to_gateway_secret(root: &SecretKey, mode: GatewayMode) -> SecretKey {
    root.derive_unhardened(mode.derivation_index())
}
