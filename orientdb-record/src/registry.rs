//! Class-name hydration hooks.
//!
//! The record layer only preserves the class tag. A schema layer registers a
//! factory per class and hydrates decoded documents through a plain lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::document::Document;

type Factory<T> = Arc<dyn Fn(Document) -> T + Send + Sync>;

pub struct ClassRegistry<T> {
    factories: HashMap<String, Factory<T>>,
}

impl<T> ClassRegistry<T> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Document) -> T + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Hydrate `doc` with the factory registered for its class. Documents with
    /// no class or an unknown class are handed back unchanged.
    pub fn hydrate(&self, doc: Document) -> Result<T, Document> {
        match doc.class().and_then(|c| self.factories.get(c)) {
            Some(factory) => Ok(factory(doc)),
            None => Err(doc),
        }
    }
}

impl<T> Default for ClassRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ClassRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<T> fmt::Debug for ClassRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
