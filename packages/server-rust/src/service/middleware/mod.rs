//! Tower middleware for the action pipeline.
//!
//! - [`guard`]: action deadline and per-action tracing span
//! - [`pipeline`]: wraps an `ActionRouter` in the guard

pub mod guard;
pub mod pipeline;

pub use guard::ActionGuardLayer;
pub use pipeline::{build_action_pipeline, ActionPipeline};
