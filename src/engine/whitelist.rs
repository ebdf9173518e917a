use std::collections::BTreeSet;

/// Field names an operation may filter, sort or project by. Anything absent is not exposed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Whitelist(BTreeSet<String>);

impl Whitelist {
    pub fn new() -> Self {
        Whitelist::default()
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(names.into_iter().map(Into::into));
    }

    pub fn allows(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merging_is_idempotent() {
        let mut w = Whitelist::new();
        w.extend(["status", "name"]);
        w.extend(["name"]);
        assert_eq!(w.len(), 2);
        assert!(w.allows("status"));
        assert!(!w.allows("role"));
    }
}
