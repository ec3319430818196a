//! Foundation layer: shared primitives grouped for the layered architecture.

pub mod clvm;
pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::*;
pub use types::*;
