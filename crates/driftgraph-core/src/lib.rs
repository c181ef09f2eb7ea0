//! Core types and contracts of the DriftGraph consistency engine.
//!
//! Nodes mirror domain entities, edges record typed relationships between
//! them and drift alerts flag downstream nodes that fell behind an upstream
//! change. Storage is reached only through [`GraphRepository`].

pub mod alert;
pub mod config;
pub mod edge;
pub mod error;
pub mod expiring;
pub mod hash;
pub mod indexing;
pub mod logging;
pub mod node;
pub mod traits;
pub mod types;

pub use alert::*;
pub use config::{
    ConfigManager, ConnectionsConfig, GraphEngineConfig, LoggingConfig, QueueSettings,
    QueuesConfig, SchedulerConfig, Settings,
};
pub use edge::*;
pub use error::*;
pub use expiring::{Clock, ExpiringStore, ManualClock, SystemClock};
pub use hash::content_hash;
pub use indexing::*;
pub use node::*;
pub use traits::*;
pub use types::*;
