//! Domain layer: pure gateway-protocol logic. No I/O; every function here is
//! deterministic over its inputs.

pub mod gateway;
pub mod keys;
pub mod puzzles;
pub mod signing;
pub mod tail;
pub mod transport;

pub use gateway::{parse_gateway_metadata, parse_gateway_spend, spend_additions, Announcement, ParsedGateway};
pub use signing::{sign_gateway_spend, signature_pairs, SignaturePair};
pub use transport::{decode_detokenization, encode_detokenization, parse_detokenization_request, DetokenizationRequest};
