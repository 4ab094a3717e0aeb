//! Host snapshot analyzer.
//!
//! Turns the resource snapshots published by host agents into selective
//! inventory updates, each paired with an audit entry.

pub mod analyzer;
pub mod audit;
pub mod config;
pub mod diff;
pub mod inventory;
pub mod metrics_defs;
mod negative_cache;
pub mod snapshot;

pub use analyzer::{HostSnapAnalyzer, MOCK_MESSAGE};
pub use audit::{AuditEntry, AuditLog, HttpAuditLog, MemoryAuditLog};
pub use config::HostSnapConfig;
pub use inventory::{
    Host, HostRelation, HttpInventory, Inventory, InventoryError, MemoryInventory,
};
