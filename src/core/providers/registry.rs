use std::{collections::HashMap, path::Path, sync::Arc};

use super::{disk::DiskUsageProvider, traits::MetricProvider};

/// A built-in provider submitted to the global inventory by
/// [`register_provider!`](crate::register_provider).
pub struct ProviderMeta {
    pub id: &'static str,
    pub factory: fn() -> Arc<dyn MetricProvider>,
}

inventory::collect!(ProviderMeta);

type MountFactory = Arc<dyn Fn(&Path) -> Arc<dyn MetricProvider> + Send + Sync>;

/// Sensor id to provider lookup, plus the factory used for mounted-disk
/// sensors, which get one provider per configured path.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn MetricProvider>>,
    mount_factory: MountFactory,
}

impl ProviderRegistry {
    /// An empty registry whose mounted-disk factory reads real filesystems.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            mount_factory: Arc::new(|path: &Path| {
                Arc::new(DiskUsageProvider::new(path)) as Arc<dyn MetricProvider>
            }),
        }
    }

    /// Every provider compiled into the binary.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for meta in inventory::iter::<ProviderMeta> {
            registry.register(meta.id, (meta.factory)());
        }
        registry
    }

    /// Adds or replaces the provider for `id`.
    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn MetricProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn with_mount_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Path) -> Arc<dyn MetricProvider> + Send + Sync + 'static,
    {
        self.mount_factory = Arc::new(factory);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn MetricProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Sorted, for stable log output.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// A provider reporting usage of the filesystem holding `path`.
    pub fn mounted(&self, path: &Path) -> Arc<dyn MetricProvider> {
        (self.mount_factory)(path)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers a provider type (constructed through `Default`) under a sensor id.
#[macro_export]
macro_rules! register_provider {
    ($provider_type:ty, $id:expr) => {
        inventory::submit! {
            $crate::core::providers::registry::ProviderMeta {
                id: $id,
                factory: || std::sync::Arc::new(<$provider_type>::default()),
            }
        }
    };
}
