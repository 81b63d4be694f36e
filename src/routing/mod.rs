//! Routing infrastructure
//!
//! ## Handler kinds (handler_kind.rs)
//!
//! The closed set of handler identifiers plus the [`Route`] the orchestrator
//! hands control to. Raw routing strings from the model are normalized here.
//!
//! ## Planner (planner.rs)
//!
//! The [`Planner`] trait and its LLM-backed implementation, which turn a
//! user message and session hints into an ordered execution plan.
//!
//! ## Plan policy (policy.rs)
//!
//! Deterministic adjustments applied to every fresh plan (upload override,
//! image edit detection).

pub mod handler_kind;
pub mod planner;
pub mod policy;
pub mod schema;

pub use handler_kind::{HandlerKind, Route};
pub use planner::{
    parse_plan_output, ExecutionPlan, LlmPlanner, PlanOutcome, PlanParseError, Planner,
    PlanningContext,
};
pub use policy::{adjust_plan, PlanAdjustment};
pub use schema::ExecutionPlanOutput;
