//! ---
//! ks_section: "05-registry-runtime"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Service registry and runtime lifecycle management."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
//! Dependency-gated service registry and the runtime facade composing it
//! with the signal bus and the timeline scheduler.

pub mod error;
pub mod registry;
pub mod runtime;
pub mod slot;

pub use error::{RegistryError, RuntimeError, UnresolvedSlot};
pub use registry::{Registering, ServiceRegistry};
pub use runtime::{Readiness, Runtime};
pub use slot::{DependencySet, ServiceHandle, SlotSpec, SlotState};

pub use keystone_common::{Predicate, PredicateRef, TypeKey};
pub use keystone_rt::{action, Action, TickReport, TimelineError, TimelineId};
pub use keystone_signal::{Dispatch, Signal, SignalError, Subscription};
