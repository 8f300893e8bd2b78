//! ---
//! ks_section: "02-signals"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Typed signal bus and subscription handles."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Synchronous, type-filtered publish/subscribe for in-process components.

use std::fmt;

use keystone_common::TypeKey;

pub mod bus;
pub mod signal;

pub use bus::{Dispatch, SignalBus};
pub use signal::{AsAny, Signal, Subscription, SubscriptionId};

/// Shared result type for signal operations.
pub type Result<T> = std::result::Result<T, SignalError>;

/// A listener that failed while a signal was being dispatched.
#[derive(Debug)]
pub struct ListenerFailure {
    /// Subscription of the failing listener.
    pub subscription: SubscriptionId,
    /// Error returned by the listener, or the panic message.
    pub error: anyhow::Error,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener {}: {:#}", self.subscription, self.error)
    }
}

/// Errors surfaced by the signal bus.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// One or more listeners failed; every other listener still ran.
    #[error("{} listener(s) failed while dispatching {signal}: {}", .failures.len(), join_failures(.failures))]
    Dispatch {
        /// Key the signal was dispatched under.
        signal: TypeKey,
        /// Number of listeners that handled the signal successfully.
        delivered: usize,
        /// Failures in delivery order.
        failures: Vec<ListenerFailure>,
    },
}

fn join_failures(failures: &[ListenerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
