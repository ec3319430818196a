//! Infrastructure layer: node and wallet RPC, registry metadata, activity
//! storage, and configuration.

pub mod config;
pub mod registry;
pub mod rpc;
pub mod storage;
