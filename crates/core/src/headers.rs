//! Ordered header mapping captured from, and replayed onto, HTTP messages.

use serde::{Deserialize, Serialize};

/// Ordered mapping of header name to value.
///
/// Names keep the order in which they were first seen. A name that appears more
/// than once is folded into a single entry with its values joined by `", "`, so
/// the list stays a mapping. Lookups are case-insensitive; stored names are kept
/// as captured.
///
/// Serializes as an array of `[name, value]` pairs so the order survives JSON
/// columns that do not preserve object key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw pairs, folding repeated names.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut list = Self::new();
        for (name, value) in pairs {
            list.append(name, value);
        }
        list
    }

    /// Add a value, folding it into an existing entry with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
