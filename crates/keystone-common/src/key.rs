//! ---
//! ks_section: "01-shared-primitives"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Shared primitives and utilities for the component runtime."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable identity of a logical service or signal type.
///
/// Equality and hashing only consider the [`TypeId`]; the type name is kept
/// for diagnostics and log output.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for the type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, as reported by [`std::any::type_name`].
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct Storage;
    struct Cache;

    #[test]
    fn keys_compare_by_type_identity() {
        assert_eq!(TypeKey::of::<Storage>(), TypeKey::of::<Storage>());
        assert_ne!(TypeKey::of::<Storage>(), TypeKey::of::<Cache>());

        let mut set = HashSet::new();
        set.insert(TypeKey::of::<Storage>());
        assert!(!set.insert(TypeKey::of::<Storage>()));
        assert!(set.insert(TypeKey::of::<Cache>()));
    }

    #[test]
    fn display_uses_type_name() {
        let key = TypeKey::of::<Storage>();
        assert!(key.to_string().ends_with("Storage"));
        assert!(format!("{key:?}").contains("Storage"));
    }
}
