//! Native component registry
//!
//! Provides a global catalog for registering native component factories
//! before any file is loaded. Each session clones an immutable snapshot of
//! the catalog so instantiation is deterministic for its lifetime.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::native::{NativeComponent, Profile};

/// Factory producing a fresh native object for an instance name.
pub type NativeFactory = Arc<dyn Fn(&str) -> Box<dyn NativeComponent> + Send + Sync>;

/// Global catalog of native component types.
pub struct NativeCatalog {
    types: RwLock<HashMap<String, NativeFactory>>,
}

static CATALOG: Lazy<NativeCatalog> = Lazy::new(|| {
    let catalog = NativeCatalog::new();
    catalog.register_default::<Profile>(Profile::TYPE_NAME);
    catalog
});

impl NativeCatalog {
    fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Access the global catalog singleton.
    pub fn global() -> &'static Self {
        &CATALOG
    }

    /// Register a native type with a factory function.
    pub fn register<F>(&self, type_name: &str, factory: F)
    where
        F: Fn(&str) -> Box<dyn NativeComponent> + Send + Sync + 'static,
    {
        self.types.write().insert(type_name.to_string(), Arc::new(factory));
    }

    /// Register a native type that implements `Default`.
    pub fn register_default<T>(&self, type_name: &str)
    where
        T: NativeComponent + Default + 'static,
    {
        self.register(type_name, |_instance| Box::new(T::default()));
    }

    /// Produce an immutable snapshot for a session.
    pub fn snapshot(&self) -> NativeRegistry {
        NativeRegistry {
            types: Arc::new(self.types.read().clone()),
        }
    }
}

/// Immutable view of the native catalog.
#[derive(Clone)]
pub struct NativeRegistry {
    types: Arc<HashMap<String, NativeFactory>>,
}

impl NativeRegistry {
    /// Registry with no native types.
    pub fn empty() -> Self {
        Self {
            types: Arc::new(HashMap::new()),
        }
    }

    /// Instantiate a native object of the given type.
    pub fn create(&self, type_name: &str, instance_name: &str) -> Option<Box<dyn NativeComponent>> {
        self.types.get(type_name).map(|factory| factory(instance_name))
    }

    /// Whether a type is registered.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        NativeCatalog::global().snapshot()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_catalog_ships_profile() {
        let registry = NativeCatalog::global().snapshot();
        assert!(registry.has_type("Profile"));
        let object = registry.create("Profile", "p").expect("profile");
        assert_eq!(object.type_name(), "Profile");
    }

    #[test]
    fn snapshots_do_not_see_later_registrations() {
        let catalog = NativeCatalog::new();
        let before = catalog.snapshot();
        catalog.register_default::<Profile>("LateProfile");
        assert!(!before.has_type("LateProfile"));
        assert!(catalog.snapshot().has_type("LateProfile"));
    }
}
