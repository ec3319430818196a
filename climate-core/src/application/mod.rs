//! Application layer: wallets, the activity scanner, and the observer
//! query surface, wired over the infrastructure seams.

pub mod observer;
pub mod scanner;
pub mod spend;
pub mod wallet;
