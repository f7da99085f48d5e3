use crate::models::AbbreviationEntry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// The matchable subset of the store: unignored entries with plaintext
/// expansions, keyed by trigger.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AbbreviationRegistry {
    expansions: HashMap<String, String>,
}

impl AbbreviationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a AbbreviationEntry>,
    {
        let expansions = entries
            .into_iter()
            .filter(|entry| entry.is_active())
            .filter_map(|entry| {
                entry
                    .expansion
                    .plaintext()
                    .map(|text| (entry.trigger.clone(), text.to_string()))
            })
            .collect();
        Self { expansions }
    }

    pub fn lookup(&self, trigger: &str) -> Option<&str> {
        self.expansions.get(trigger).map(String::as_str)
    }

    pub fn contains(&self, trigger: &str) -> bool {
        self.expansions.contains_key(trigger)
    }

    pub fn len(&self) -> usize {
        self.expansions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expansions.is_empty()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.expansions.keys().map(String::as_str)
    }
}

/// Swappable handle shared by the listener (reader) and the control thread
/// (writer). A registry is never edited after publication; `replace`
/// installs a fresh one.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    current: RwLock<Arc<AbbreviationRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: AbbreviationRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<AbbreviationRegistry> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, registry: AbbreviationRegistry) {
        *self.current.write() = Arc::new(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Expansion;

    fn entry(trigger: &str, expansion: Expansion, ignored: bool) -> AbbreviationEntry {
        AbbreviationEntry {
            trigger: trigger.to_string(),
            expansion,
            ignored,
            category_id: "text".to_string(),
            stored_ciphertext: None,
        }
    }

    #[test]
    fn only_unignored_plaintext_entries_are_active() {
        let entries = vec![
            entry("brb", Expansion::Plaintext("be right back".into()), false),
            entry("omw", Expansion::Plaintext("on my way".into()), true),
            entry("pw", Expansion::Locked, false),
            entry("pin", Expansion::DecryptFailed, false),
        ];

        let registry = AbbreviationRegistry::from_entries(&entries);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("brb"), Some("be right back"));
        assert!(!registry.contains("omw"));
        assert!(!registry.contains("pw"));
        assert!(!registry.contains("pin"));
    }

    #[test]
    fn old_snapshots_survive_replacement() {
        let shared = SharedRegistry::default();
        let before = shared.snapshot();
        assert!(before.is_empty());

        let entries = vec![entry("ty", Expansion::Plaintext("thank you".into()), false)];
        shared.replace(AbbreviationRegistry::from_entries(&entries));

        assert!(before.is_empty());
        assert_eq!(shared.snapshot().lookup("ty"), Some("thank you"));
    }
}
