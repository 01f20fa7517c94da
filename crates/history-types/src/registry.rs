use std::collections::BTreeMap;
use std::sync::Arc;

/// Names a registrable class exposes for lookup.
pub trait Registered {
    /// Canonical type name stored on records (`"Extrude"`, `"coincident"`).
    fn type_name(&self) -> &str;
    /// Short prefix used when generating record IDs (`"E"`, `"CO"`).
    fn short_name(&self) -> &str;
}

/// Type-name → class map. Unknown names resolve to `None`, never an error.
pub struct Registry<T: ?Sized> {
    classes: BTreeMap<String, Arc<T>>,
}

impl<T: ?Sized + Registered> Registry<T> {
    pub fn new() -> Self {
        Self {
            classes: BTreeMap::new(),
        }
    }

    /// Register a class under its type name. Re-registering replaces the entry.
    pub fn register(&mut self, class: Arc<T>) {
        self.classes.insert(class.type_name().to_string(), class);
    }

    /// Resolve by exact type name, then case-insensitively by type or short name.
    pub fn resolve(&self, type_name: &str) -> Option<Arc<T>> {
        if let Some(class) = self.classes.get(type_name) {
            return Some(Arc::clone(class));
        }
        self.classes
            .values()
            .find(|c| {
                c.type_name().eq_ignore_ascii_case(type_name)
                    || c.short_name().eq_ignore_ascii_case(type_name)
            })
            .cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_some()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl<T: ?Sized + Registered> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
