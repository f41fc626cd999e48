//! Token module for the assets the engine tracks.
//!
//! This module handles:
//! - Token types and address validation
//! - The registry of known tokens and their last-known USD prices

pub mod registry;
pub mod types;

pub use registry::TokenRegistry;
pub use types::{normalize_address, Token, BASE_TOKENS};
