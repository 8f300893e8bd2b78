//! ---
//! ks_section: "01-shared-primitives"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Shared primitives and utilities for the component runtime."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
//! Capability contracts the runtime consumes from its collaborators.

use std::fmt;
use std::sync::Arc;

/// Zero-argument readiness check.
///
/// Predicates gate timeline steps and are evaluated repeatedly, so they must
/// be cheap and free of side effects.
pub trait Predicate: Send + Sync {
    fn evaluate(&self) -> bool;
}

impl<F> Predicate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn evaluate(&self) -> bool {
        self()
    }
}

/// Shared handle to a predicate instance.
///
/// Two handles are the *same* predicate only when they point at the same
/// allocation; cloning a handle keeps its identity, building a new one from an
/// identical closure does not.
#[derive(Clone)]
pub struct PredicateRef(Arc<dyn Predicate>);

impl PredicateRef {
    pub fn new<P>(predicate: P) -> Self
    where
        P: Predicate + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn from_arc(predicate: Arc<dyn Predicate>) -> Self {
        Self(predicate)
    }

    /// A fresh predicate that is always satisfied.
    pub fn always() -> Self {
        Self::new(|| true)
    }

    pub fn evaluate(&self) -> bool {
        self.0.evaluate()
    }

    /// Instance identity check used to merge timeline steps.
    pub fn same_instance(&self, other: &PredicateRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl fmt::Debug for PredicateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PredicateRef")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Errors raised by [`Model`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model does not implement the requested direction.
    #[error("model does not support {0}")]
    Unsupported(&'static str),
    #[error("failed to encode model: {0}")]
    Encode(String),
    #[error("failed to decode model: {0}")]
    Decode(String),
}

/// Optional string round-trip capability for registered objects.
///
/// The registry never requires nor interprets it.
pub trait Model {
    fn save(&self) -> Result<String, ModelError>;
    fn load(&mut self, data: &str) -> Result<(), ModelError>;
}
