//! Process-instance execution core: flow-node state machine, branch token ledger, event
//! correlation and archival.

pub mod config;
pub mod error;
pub mod model;
pub mod runtime;
pub mod store;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorContext, Result, StoreError};
pub use runtime::engine::Engine;
pub use store::Stores;
