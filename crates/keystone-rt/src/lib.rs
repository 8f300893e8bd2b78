//! ---
//! ks_section: "04-scheduling"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Timeline scheduling helpers supporting the runtime facade."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
//! Cooperative timeline scheduling for the Keystone runtime.
//!
//! Lanes hold ordered, predicate-gated steps and only advance when the owner
//! calls [`TimelineScheduler::update_timeline`]; there is no timer.

pub mod scheduling;

pub use scheduling::{
    action, Action, FiredStep, TickReport, TimelineError, TimelineId, TimelineScheduler,
};
