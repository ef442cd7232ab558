//! Git smart-protocol façade that re-exports core traits, transport adapters, capability types, and
//! helpers so embedders can both serve and speak Git smart-HTTP with minimal plumbing.

pub mod client;
pub mod core;
pub mod http;
pub mod pack;
pub mod smart;
pub mod types;
pub mod utils;

// Re-export main interfaces
pub use core::{AuthenticationService, GitProtocol, RepositoryAccess};

pub use types::*;
