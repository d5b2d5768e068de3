//! Resource id decompression table.

use std::collections::HashMap;

use crate::{ResKey, ResourceId};

/// Maps resource ids declared by one peer to their full paths.
///
/// Each side of a link keeps one table for the ids the *other* side
/// declared, and passes it to [`decode`](crate::decode) so id-keyed
/// messages come out with their full path.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    paths: HashMap<ResourceId, String>,
}

impl ResourceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `path`, returning the previous binding if any.
    pub fn insert(
        &mut self,
        id: ResourceId,
        path: impl Into<String>,
    ) -> Option<String> {
        self.paths.insert(id, path.into())
    }

    /// Removes the binding for `id`.
    pub fn remove(&mut self, id: ResourceId) -> Option<String> {
        self.paths.remove(&id)
    }

    /// Returns the path bound to `id`.
    pub fn get(&self, id: ResourceId) -> Option<&str> {
        self.paths.get(&id).map(String::as_str)
    }

    /// The lowest id bound to `path`, if any.
    pub fn id_of(&self, path: &str) -> Option<ResourceId> {
        self.paths
            .iter()
            .filter(|(_, p)| p.as_str() == path)
            .map(|(&id, _)| id)
            .min()
    }

    /// Returns `true` if `id` is bound.
    pub fn contains(&self, id: ResourceId) -> bool {
        self.paths.contains_key(&id)
    }

    /// Expands a key to its full path, or `None` if it names an unbound id.
    pub fn resolve(&self, key: &ResKey) -> Option<String> {
        match key {
            ResKey::Name(name) => Some(name.clone()),
            ResKey::Id(id) => self.get(*id).map(str::to_string),
            ResKey::IdWithSuffix(id, suffix) => {
                self.get(*id).map(|path| format!("{path}{suffix}"))
            }
        }
    }

    /// Replaces id references with full names where the id is bound.
    /// Unbound ids are left untouched.
    pub fn decompress(&self, key: ResKey) -> ResKey {
        match self.resolve(&key) {
            Some(name) => ResKey::Name(name),
            None => key,
        }
    }

    /// Number of bound ids.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if no id is bound.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Drops every binding.
    pub fn clear(&mut self) {
        self.paths.clear();
    }
}
