//! ---
//! ks_section: "05-registry-runtime"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Service registry and runtime lifecycle management."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::fmt;

use keystone_common::TypeKey;
use keystone_rt::TimelineError;
use keystone_signal::SignalError;

/// A pending slot together with the dependencies it still waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedSlot {
    pub slot: TypeKey,
    pub waiting_on: Vec<TypeKey>,
}

impl fmt::Display for UnresolvedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} waits on [{}]", self.slot, join(&self.waiting_on))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("illegal duplicate registration of {key}")]
    DuplicateRegistration { key: TypeKey },
    #[error("{key} is not registered or still pending")]
    NotRegistered { key: TypeKey },
    #[error("{key} is registered but is not a {expected}")]
    TypeMismatch { key: TypeKey, expected: &'static str },
    /// Slots that can never complete because their dependencies form a cycle.
    #[error("dependency cycle blocks [{}]", join(.slots))]
    Deadlock { slots: Vec<TypeKey> },
    /// Slots still waiting on dependencies that nobody registered.
    #[error("unresolved dependencies: {}", join(.unresolved))]
    UnresolvedDependency { unresolved: Vec<UnresolvedSlot> },
}

/// Facade-level error covering every runtime component.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
