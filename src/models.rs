use serde::{Deserialize, Serialize};
use std::fmt;

pub const LOCKED_LABEL: &str = "[ENCRYPTED - LOCKED]";
pub const DECRYPT_FAILED_LABEL: &str = "[DECRYPTION FAILED]";

/// Category assigned to legacy entries that were stored as bare strings
pub const LEGACY_CATEGORY: &str = "text";

/// The in-memory form of an entry's replacement text.
///
/// Sealed values (`Locked`, `DecryptFailed`) carry no plaintext. They are
/// never matched, never edited and never written back in place of the
/// ciphertext they stand for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum Expansion {
    Plaintext(String),
    Locked,
    DecryptFailed,
}

impl Expansion {
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            Expansion::Plaintext(text) => Some(text),
            Expansion::Locked | Expansion::DecryptFailed => None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        match self {
            Expansion::Plaintext(_) => false,
            Expansion::Locked | Expansion::DecryptFailed => true,
        }
    }
}

impl fmt::Display for Expansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expansion::Plaintext(text) => write!(f, "{}", text),
            Expansion::Locked => write!(f, "{}", LOCKED_LABEL),
            Expansion::DecryptFailed => write!(f, "{}", DECRYPT_FAILED_LABEL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbbreviationEntry {
    pub trigger: String,
    pub expansion: Expansion,
    pub ignored: bool,
    pub category_id: String,
    /// Ciphertext exactly as read from disk. Cleared when the expansion is
    /// edited, so an untouched entry is written back byte-for-byte.
    #[serde(skip)]
    pub stored_ciphertext: Option<String>,
}

impl AbbreviationEntry {
    pub fn new(trigger: String, expansion: String, category_id: String) -> Self {
        Self {
            trigger,
            expansion: Expansion::Plaintext(expansion),
            ignored: false,
            category_id,
            stored_ciphertext: None,
        }
    }

    pub fn update_expansion(&mut self, expansion: String) {
        self.expansion = Expansion::Plaintext(expansion);
        self.stored_ciphertext = None;
    }

    /// Whether this entry belongs in the active registry
    pub fn is_active(&self) -> bool {
        !self.ignored && !self.expansion.is_sealed()
    }
}

/// One record of `expansions.json`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredExpansion {
    pub replacement: String,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    LEGACY_CATEGORY.to_string()
}

/// A value of `expansions.json` as found on disk. Old files stored the
/// replacement as a bare string.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum StoredValue {
    Record(StoredExpansion),
    Legacy(String),
}

impl StoredValue {
    pub fn normalize(self) -> StoredExpansion {
        match self {
            StoredValue::Record(record) => record,
            StoredValue::Legacy(replacement) => StoredExpansion {
                replacement,
                ignored: false,
                tag: default_tag(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Category {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_true")]
    pub deletable: bool,
    #[serde(rename = "is_encrypted", default)]
    pub encrypted: bool,
}

pub const DEFAULT_ICON: &str = "📁";
pub const DEFAULT_COLOR: &str = "#808080";

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

impl Category {
    pub fn new(id: &str, name: &str, icon: &str, description: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            description: description.to_string(),
            color: color.to_string(),
            deletable: true,
            encrypted: false,
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Why a store mutation was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Refusal {
    /// The entry's category is encrypted and no key is available
    Locked,
    /// The entry's stored ciphertext could not be decrypted
    DecryptFailed,
    NotFound,
    AlreadyExists,
    UnknownCategory,
    NotDeletable,
    /// Turning encryption off would strand entries that are still sealed
    SealedEntries,
    InvalidInput,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Refusal::Locked => "category is locked: encryption key unavailable",
            Refusal::DecryptFailed => "entry could not be decrypted",
            Refusal::NotFound => "not found",
            Refusal::AlreadyExists => "already exists",
            Refusal::UnknownCategory => "unknown category",
            Refusal::NotDeletable => "category cannot be deleted",
            Refusal::SealedEntries => "category still holds sealed entries",
            Refusal::InvalidInput => "invalid input",
        };
        f.write_str(reason)
    }
}

/// Result of a guarded mutation. A refusal is an expected answer, not an
/// error: nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MutationOutcome {
    Applied,
    Refused(Refusal),
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_string_values_migrate_to_text_category() {
        let value: StoredValue = serde_json::from_str(r#""hello world""#).unwrap();
        let record = value.normalize();
        assert_eq!(record.replacement, "hello world");
        assert!(!record.ignored);
        assert_eq!(record.tag, LEGACY_CATEGORY);
    }

    #[test]
    fn records_missing_optional_fields_get_defaults() {
        let value: StoredValue = serde_json::from_str(r#"{ "replacement": "x" }"#).unwrap();
        let record = value.normalize();
        assert!(!record.ignored);
        assert_eq!(record.tag, "text");
    }

    #[test]
    fn sealed_expansions_display_their_labels() {
        assert_eq!(Expansion::Locked.to_string(), LOCKED_LABEL);
        assert_eq!(Expansion::DecryptFailed.to_string(), DECRYPT_FAILED_LABEL);
        assert_eq!(Expansion::Plaintext("hi".into()).to_string(), "hi");
        assert!(Expansion::Locked.plaintext().is_none());
    }

    #[test]
    fn editing_clears_preserved_ciphertext() {
        let mut entry = AbbreviationEntry::new("pw".into(), "secret".into(), "passwords".into());
        entry.stored_ciphertext = Some("abc".into());
        entry.update_expansion("new".into());
        assert_eq!(entry.stored_ciphertext, None);
        assert!(entry.is_active());

        entry.ignored = true;
        assert!(!entry.is_active());
    }

    #[test]
    fn category_defaults_apply_to_old_files() {
        let category: Category =
            serde_json::from_str(r#"{ "name": "Work", "salt": "legacy" }"#).unwrap();
        assert!(category.deletable);
        assert!(!category.encrypted);
        assert_eq!(category.color, DEFAULT_COLOR);
    }
}
