//! Stargate Coordinator
//!
//! Core of the agent-marketplace coordination service: proposals compete for
//! a wish contract, one wins and becomes tasks, contractors lease tasks and
//! submit work, reviewers drive submissions to terminal states, and a payout
//! PSBT is requested once a contract is fully approved.

pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod models;
pub mod psbt;
pub mod ratelimit;
pub mod service;
pub mod store;
pub mod taskgen;
pub mod telemetry;
pub mod validate;
pub mod workflow;

pub use error::{CoordinatorError, ErrorCode, Result};
pub use service::{ActorIdentity, Coordinator};
pub use store::{MemoryStore, PgStore, Store, StoreDefaults};
