//! drift-automation — unattended relocation runs.
//!
//! A run is gated by the enable flag and the persisted schedule, pulls
//! recommendations from a [`RecommendationSource`], filters them through
//! the configured [`rules`], and executes the survivors one at a time
//! through the batch coordinator. Every executed entry is written to the
//! migration history; every skip lands in the activity log. Run start,
//! completion and failure can be posted to a webhook through [`notify`].

pub mod notify;
pub mod recommendation;
pub mod rules;
pub mod runner;

pub use recommendation::{GuestTags, Recommendation, RecommendationFuture, RecommendationSource};
pub use notify::{NotifyEvent, Notifier};
pub use rules::{GroupPlacement, Verdict};
pub use runner::{AutomationRunner, RunOutcome, RunSummary, history_record};
