//! Device Transfer Library
//!
//! Pulls directories from a connected device into a host tree through an
//! external device-control tool, keeping the previous copy of every
//! destination until the new one is confirmed complete.

pub mod config;
pub mod daemon;
pub mod device;
pub mod executor;
pub mod fs;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use device::{AdbBridge, DeviceBridge};
pub use executor::{TransferEngine, TransferReport, TransferStatus};
pub use transfer::progress::ProgressSnapshot;
pub use utils::errors::TransferError;
pub type Result<T> = std::result::Result<T, TransferError>;
