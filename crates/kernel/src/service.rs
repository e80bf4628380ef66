use std::{any::Any, fmt, sync::Arc};

/// A named capability contributed by a plugin.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Read-only view of the services visible at one point in time.
///
/// Built by scanning enabled, mounted plugins in registration order; the
/// first plugin to contribute a name wins.
#[derive(Clone, Default)]
pub struct Services {
    entries: Vec<ServiceEntry>,
}

#[derive(Clone)]
struct ServiceEntry {
    name: String,
    provider: String,
    service: Service,
}

impl Services {
    pub(crate) fn insert_if_absent(&mut self, name: &str, provider: &str, service: &Service) {
        if self.contains(name) {
            return;
        }
        self.entries.push(ServiceEntry {
            name: name.to_string(),
            provider: provider.to_string(),
            service: Arc::clone(service),
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.service)
    }

    /// Typed accessor. `None` if the name is absent or the first provider's
    /// service is not a `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name)
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }

    /// Name of the plugin whose service is visible under `name`.
    pub fn provider(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.provider.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.name, &e.provider)))
            .finish()
    }
}
