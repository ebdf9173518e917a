//! Engine field tags: an open `key:value;flag` annotation set.

use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldTag {
    entries: BTreeMap<String, String>,
}

impl FieldTag {
    /// Parses `"list:in,fussy;add:required;readonly"`. Flags get an empty value.
    pub fn parse(raw: &str) -> Self {
        let mut entries = BTreeMap::new();
        for segment in raw.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = match segment.split_once(':') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (segment, ""),
            };
            entries.insert(key.to_string(), value.to_string());
        }
        FieldTag { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Comma-separated values of a key, e.g. `list:in,fussy` -> `["in", "fussy"]`.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
