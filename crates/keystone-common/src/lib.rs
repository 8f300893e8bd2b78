//! ---
//! ks_section: "01-shared-primitives"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Shared primitives and utilities for the component runtime."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
//! Core shared primitives for the Keystone workspace.
//! This crate exposes the capability contracts consumed by the registry and
//! the scheduler, stable type keys, configuration loading and the tracing
//! bootstrap used by binaries.

pub mod capability;
pub mod config;
pub mod key;
pub mod logging;

pub use capability::{Model, ModelError, Predicate, PredicateRef};
pub use config::{LoggingConfig, RegistryConfig, RuntimeConfig, SignalConfig, TimelineConfig};
pub use key::TypeKey;
pub use logging::{init_tracing, LogFormat};
