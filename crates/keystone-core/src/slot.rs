//! ---
//! ks_section: "05-registry-runtime"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Service registry and runtime lifecycle management."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use keystone_common::TypeKey;

/// Shared reference to a registered instance. The registry never owns the
/// instance exclusively; callers keep their own clones.
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

pub(crate) type Completion = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Pending,
    Complete,
}

/// Ordered set of dependency keys a slot waits for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    keys: IndexSet<TypeKey>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key; returns `false` when it was already present.
    pub fn insert(&mut self, key: TypeKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeKey> {
        self.keys.iter()
    }

    /// AND over every dependency; an empty set is always satisfied.
    pub fn is_satisfied<F>(&self, mut is_complete: F) -> bool
    where
        F: FnMut(&TypeKey) -> bool,
    {
        self.keys.iter().all(|key| is_complete(key))
    }

    /// Dependencies that are not complete yet, in declaration order.
    pub fn unresolved<F>(&self, mut is_complete: F) -> Vec<TypeKey>
    where
        F: FnMut(&TypeKey) -> bool,
    {
        self.keys
            .iter()
            .filter(|key| !is_complete(key))
            .copied()
            .collect()
    }
}

impl FromIterator<TypeKey> for DependencySet {
    fn from_iter<I: IntoIterator<Item = TypeKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DependencySet {
    type Item = &'a TypeKey;
    type IntoIter = indexmap::set::Iter<'a, TypeKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Everything needed to register one slot.
///
/// ```ignore
/// let spec = SlotSpec::new(Arc::new(Cache::default()))
///     .depends_on::<Storage>()
///     .on_complete(|| tracing::info!("cache ready"));
/// ```
pub struct SlotSpec {
    pub(crate) key: TypeKey,
    pub(crate) handle: ServiceHandle,
    pub(crate) on_complete: Option<Completion>,
    pub(crate) dependencies: DependencySet,
}

impl SlotSpec {
    /// Slot keyed by the instance's own type.
    pub fn new<T>(instance: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::with_key(TypeKey::of::<T>(), instance)
    }

    /// Slot under an explicit key. `get` downcasts the handle, so looking it
    /// up as a type other than the handle's concrete type fails.
    pub fn with_key(key: TypeKey, handle: ServiceHandle) -> Self {
        Self {
            key,
            handle,
            on_complete: None,
            dependencies: DependencySet::new(),
        }
    }

    pub fn depends_on<D: ?Sized + 'static>(self) -> Self {
        self.depends_on_key(TypeKey::of::<D>())
    }

    pub fn depends_on_key(mut self, key: TypeKey) -> Self {
        self.dependencies.insert(key);
        self
    }

    pub fn with_dependencies<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = TypeKey>,
    {
        self.dependencies.keys.extend(keys);
        self
    }

    /// Callback run exactly once, right before the slot becomes complete.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }
}

impl fmt::Debug for SlotSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotSpec")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Storage;
    struct Cache;

    #[test]
    fn dependency_set_is_ordered_and_deduplicated() {
        let set: DependencySet = [
            TypeKey::of::<Cache>(),
            TypeKey::of::<Storage>(),
            TypeKey::of::<Cache>(),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        let order: Vec<_> = set.iter().copied().collect();
        assert_eq!(order, vec![TypeKey::of::<Cache>(), TypeKey::of::<Storage>()]);
    }

    #[test]
    fn empty_set_is_satisfied() {
        let set = DependencySet::new();
        assert!(set.is_satisfied(|_| false));
        assert!(set.unresolved(|_| false).is_empty());
    }

    #[test]
    fn unresolved_lists_incomplete_dependencies() {
        let set: DependencySet = [TypeKey::of::<Storage>(), TypeKey::of::<Cache>()]
            .into_iter()
            .collect();
        let storage = TypeKey::of::<Storage>();
        assert!(!set.is_satisfied(|key| *key == storage));
        assert_eq!(
            set.unresolved(|key| *key == storage),
            vec![TypeKey::of::<Cache>()]
        );
    }

    #[test]
    fn slot_spec_builder_collects_dependencies() {
        let spec = SlotSpec::new(Arc::new(Cache))
            .depends_on::<Storage>()
            .depends_on::<Storage>()
            .on_complete(|| {});
        assert_eq!(spec.key(), TypeKey::of::<Cache>());
        assert_eq!(spec.dependencies().len(), 1);
        assert!(format!("{spec:?}").contains("on_complete: true"));
    }
}
