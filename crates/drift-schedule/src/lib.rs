//! drift-schedule — decides whether an automated relocation may run now.
//!
//! # Evaluation rules
//!
//! ```text
//! no enabled windows            → permitted
//! any matching deny window      → denied (blackouts beat allow windows)
//! allow windows configured      → permitted iff one of them matches
//! only deny windows, none match → permitted
//! ```
//!
//! A window matches when the local weekday is one of its days and the
//! local time falls in `[start, end)`. Overnight windows (`end < start`)
//! match `time >= start || time < end` on the listed days only; the
//! after-midnight tail is NOT carried into the following day.

pub mod evaluator;

pub use evaluator::{Decision, DecisionReason, evaluate, evaluate_local, is_permitted, local_time, window_matches};
