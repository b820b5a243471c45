//! Core types shared by the live market-data crates
//!
//! This crate provides:
//! - Asset and network definitions
//! - Price and fee quote types
//! - Error taxonomy
//! - Injected configuration

pub mod types;
pub mod quotes;
pub mod config;
pub mod errors;

pub use types::*;
pub use quotes::*;
pub use config::*;
pub use errors::*;
