#![forbid(unsafe_code)]

//! Protocol adapter between a line-delimited JSON-RPC coding-agent backend
//! and a browser session protocol.

pub mod adapter;
pub mod browser;
pub mod config;
pub mod errors;
pub mod models;
pub mod rpc;
pub mod spawner;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
