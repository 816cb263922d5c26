//! Shared configuration, error and domain types for Shelfcast.

pub mod config;
pub mod error;
pub mod types;
