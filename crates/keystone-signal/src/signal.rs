//! ---
//! ks_section: "02-signals"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Typed signal bus and subscription handles."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::any::Any;
use std::fmt;

use keystone_common::TypeKey;

/// Upcast helper so `dyn Signal` values can be narrowed to concrete types.
pub trait AsAny: Any {
    /// View the value as [`Any`].
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marker for values that travel over the [`SignalBus`](crate::SignalBus).
pub trait Signal: AsAny + Send + Sync + 'static {}

impl dyn Signal {
    /// Checked narrowing to the concrete signal type `S`.
    pub fn downcast_ref<S: Signal>(&self) -> Option<&S> {
        self.as_any().downcast_ref::<S>()
    }

    /// Whether the signal's concrete type is `S`.
    pub fn is<S: Signal>(&self) -> bool {
        self.as_any().is::<S>()
    }
}

/// Opaque identifier allocated for every listener at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    /// Raw numeric value, for logging.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token returned by `add_listener`; hand it back to stop listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) key: TypeKey,
}

impl Subscription {
    /// Identifier of the listener.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Signal key the listener is registered under.
    pub fn key(&self) -> TypeKey {
        self.key
    }
}
