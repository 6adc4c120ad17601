//! drift-state — embedded state store for Drift.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the persisted schedule
//! configuration, the migration history, and the automation run state.
//!
//! Values are JSON-serialized into `&[u8]` columns. History keys are
//! `{epoch:020}:{uuid}` so a plain key scan yields records in time order.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
