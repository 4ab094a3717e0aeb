//! Consistent-hash ownership of sharding keys across the live collector nodes.
//!
//! The ring is rebuilt from a service-discovery source on a fixed interval and
//! answers a single question for the porters: does this process own a key?

pub mod config;
pub mod discovery;
mod membership;
pub mod metrics_defs;
mod node;
pub mod ring;

pub use discovery::{DiscoveryError, HttpDiscovery, ServiceDiscovery, StaticDiscovery};
pub use membership::{Membership, RefreshSummary};
pub use node::{MembershipError, Node};
pub use ring::HashRing;
