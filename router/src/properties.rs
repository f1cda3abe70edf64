//! Property bags and the table of routing-only keys.

use indexmap::IndexMap;
use std::fmt;

/// Keys the router consumes itself. They never reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedKey {
    /// The request with routing arguments removed, handed to the backend.
    ForwardTarget,
    BackendType,
    /// Backend version; `_` in the value is read as `.`.
    BackendVersion,
}

impl ReservedKey {
    pub const ALL: [ReservedKey; 3] = [
        ReservedKey::ForwardTarget,
        ReservedKey::BackendType,
        ReservedKey::BackendVersion,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            ReservedKey::ForwardTarget => "proxyRealUrl",
            ReservedKey::BackendType => "proxyDbType",
            ReservedKey::BackendVersion => "dbversion",
        }
    }

    pub const fn default_value(&self) -> &'static str {
        ""
    }

    pub const fn required(&self) -> bool {
        matches!(self, ReservedKey::BackendVersion)
    }

    pub const fn description(&self) -> &'static str {
        match self {
            ReservedKey::ForwardTarget => "The request forwarded to the selected backend",
            ReservedKey::BackendType => "The type of the target backend",
            ReservedKey::BackendVersion => "The version of the target backend",
        }
    }

    /// Case-sensitive lookup in the reserved table.
    pub fn from_name(name: &str) -> Option<ReservedKey> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }

    pub fn is_reserved(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    pub fn get<'a>(&self, properties: &'a PropertyBag) -> Option<&'a str> {
        properties.get(self.name())
    }

    pub fn set(&self, properties: &mut PropertyBag, value: impl Into<String>) {
        properties.insert(self.name(), value);
    }
}

impl fmt::Display for ReservedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered string-to-string map of connection properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    entries: IndexMap<String, String>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every entry of `other` into `self`, overriding existing keys.
    pub fn merge(&mut self, other: &PropertyBag) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Splits into (reserved, pass-through) without touching `self`.
    pub fn partition(&self) -> (PropertyBag, PropertyBag) {
        let mut reserved = PropertyBag::new();
        let mut pass_through = PropertyBag::new();
        for (key, value) in self.iter() {
            if ReservedKey::is_reserved(key) {
                reserved.insert(key, value);
            } else {
                pass_through.insert(key, value);
            }
        }
        (reserved, pass_through)
    }

    /// The bag a backend is allowed to see.
    pub fn without_reserved(&self) -> PropertyBag {
        self.partition().1
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = PropertyBag::new();
        for (key, value) in iter {
            bag.insert(key, value);
        }
        bag
    }
}

impl From<IndexMap<String, String>> for PropertyBag {
    fn from(entries: IndexMap<String, String>) -> Self {
        PropertyBag { entries }
    }
}

/// Introspection record for one reserved key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub current_value: String,
    pub required: bool,
    pub description: &'static str,
}

impl PropertyInfo {
    pub fn for_key(key: ReservedKey, properties: &PropertyBag) -> Self {
        PropertyInfo {
            name: key.name(),
            current_value: key
                .get(properties)
                .unwrap_or(key.default_value())
                .to_string(),
            required: key.required(),
            description: key.description(),
        }
    }
}
