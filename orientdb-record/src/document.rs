//! Documents: ordered, typed field maps with optional class and identity.

use indexmap::IndexMap;

use crate::rid::Rid;
use crate::value::Value;

/// Field names starting with this marker are metadata, never user data.
pub const METADATA_MARKER: char = '@';

pub fn is_metadata_field(name: &str) -> bool {
    name.starts_with(METADATA_MARKER)
}

/// A typed document. Field order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    class: Option<String>,
    rid: Option<Rid>,
    version: Option<i32>,
    fields: IndexMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            ..Self::default()
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Attach the identity of a persisted record.
    pub fn with_identity(mut self, rid: Rid, version: i32) -> Self {
        self.rid = Some(rid);
        self.version = Some(version);
        self
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn set_class(&mut self, class: Option<String>) {
        self.class = class.filter(|c| !c.is_empty());
    }

    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Option<Rid>) {
        self.rid = rid;
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn set_version(&mut self, version: Option<i32>) {
        self.version = version;
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Set a field, returning the previous value. Re-setting an existing
    /// field keeps its original position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// User fields in insertion order; metadata names are skipped.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(|(name, _)| !is_metadata_field(name))
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields().map(|(name, _)| name)
    }

    pub fn len(&self) -> usize {
        self.fields().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_fields(self) -> IndexMap<String, Value> {
        self.fields
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
            ..Self::default()
        }
    }
}
