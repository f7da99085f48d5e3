use crate::categories::CategoryStore;
use crate::crypto::{self, EncryptionKey};
use crate::error::Result;
use crate::models::{AbbreviationEntry, Expansion, StoredExpansion, StoredValue};
use crate::registry::AbbreviationRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Write `value` as pretty JSON by filling a temp file next to `path` and
/// renaming it over the target, so readers never see a half-written file.
/// Last modification time of a file, `None` when it does not exist
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let serialized = serde_json::to_string_pretty(value)?;
    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(serialized.as_bytes())?;
    file.flush()?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Keep a copy of a file we could not parse before it gets overwritten
pub(crate) fn back_up_unreadable(path: &Path) {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    match fs::copy(path, &backup) {
        Ok(_) => warn!(backup = %Path::new(&backup).display(), "Saved a copy of the unreadable file"),
        Err(e) => warn!(error = %e, "Could not back up unreadable file"),
    }
}

/// Abbreviation entries as persisted in `expansions.json`, held in their
/// unsealed in-memory form.
#[derive(Debug, Clone)]
pub struct ExpansionStore {
    path: PathBuf,
    entries: BTreeMap<String, AbbreviationEntry>,
}

impl ExpansionStore {
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    /// Load and unseal every entry. A missing file is an empty store; an
    /// unreadable one is backed up and treated as empty.
    pub fn load(path: &Path, categories: &CategoryStore, key: Option<&EncryptionKey>) -> Self {
        let records = match read_records(path) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load expansions, starting empty");
                if path.exists() {
                    back_up_unreadable(path);
                }
                BTreeMap::new()
            }
        };

        let entries = records
            .into_iter()
            .map(|(trigger, record)| {
                let entry = unseal(trigger.clone(), record, categories, key);
                (trigger, entry)
            })
            .collect::<BTreeMap<_, _>>();

        debug!(count = entries.len(), "Loaded expansions");
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Seal and write every entry. Returns the triggers that had to be
    /// skipped because they could not be written without exposing or
    /// inventing ciphertext.
    pub fn save(&self, categories: &CategoryStore, key: Option<&EncryptionKey>) -> Result<Vec<String>> {
        let mut records = BTreeMap::new();
        let mut skipped = Vec::new();

        for (trigger, entry) in &self.entries {
            match seal(entry, categories, key)? {
                Some(record) => {
                    records.insert(trigger.clone(), record);
                }
                None => {
                    warn!(
                        trigger = %trigger,
                        category = %entry.category_id,
                        "Skipping entry in locked category, it has no ciphertext to keep"
                    );
                    skipped.push(trigger.clone());
                }
            }
        }

        write_json_atomic(&self.path, &records)?;
        Ok(skipped)
    }

    pub fn get(&self, trigger: &str) -> Option<&AbbreviationEntry> {
        self.entries.get(trigger)
    }

    pub fn get_mut(&mut self, trigger: &str) -> Option<&mut AbbreviationEntry> {
        self.entries.get_mut(trigger)
    }

    pub fn insert(&mut self, entry: AbbreviationEntry) {
        self.entries.insert(entry.trigger.clone(), entry);
    }

    pub fn remove(&mut self, trigger: &str) -> Option<AbbreviationEntry> {
        self.entries.remove(trigger)
    }

    pub fn entries(&self) -> impl Iterator<Item = &AbbreviationEntry> {
        self.entries.values()
    }

    pub fn in_category<'a>(&'a self, category_id: &'a str) -> impl Iterator<Item = &'a AbbreviationEntry> {
        self.entries
            .values()
            .filter(move |entry| entry.category_id == category_id)
    }

    pub fn remove_category(&mut self, category_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.category_id != category_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn registry(&self) -> AbbreviationRegistry {
        AbbreviationRegistry::from_entries(self.entries.values())
    }
}

fn read_records(path: &Path) -> Result<BTreeMap<String, StoredExpansion>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let raw: BTreeMap<String, StoredValue> = serde_json::from_str(&content)?;
    Ok(raw
        .into_iter()
        .map(|(trigger, value)| (trigger, value.normalize()))
        .collect())
}

/// Turn a persisted record into its in-memory entry
pub fn unseal(
    trigger: String,
    record: StoredExpansion,
    categories: &CategoryStore,
    key: Option<&EncryptionKey>,
) -> AbbreviationEntry {
    let StoredExpansion {
        replacement,
        ignored,
        tag,
    } = record;

    let (expansion, stored_ciphertext) = if !categories.is_encrypted(&tag) {
        (Expansion::Plaintext(replacement), None)
    } else {
        match key {
            Some(key) => match crypto::decrypt(&replacement, key) {
                Ok(plaintext) => (Expansion::Plaintext(plaintext), Some(replacement)),
                Err(_) => {
                    warn!(trigger = %trigger, "Could not decrypt entry");
                    (Expansion::DecryptFailed, Some(replacement))
                }
            },
            None => (Expansion::Locked, Some(replacement)),
        }
    };

    AbbreviationEntry {
        trigger,
        expansion,
        ignored,
        category_id: tag,
        stored_ciphertext,
    }
}

/// Turn an entry back into its persisted record. `Ok(None)` means the
/// entry cannot be written safely and must be skipped.
pub fn seal(
    entry: &AbbreviationEntry,
    categories: &CategoryStore,
    key: Option<&EncryptionKey>,
) -> Result<Option<StoredExpansion>> {
    let replacement = if categories.is_encrypted(&entry.category_id) {
        match (&entry.expansion, &entry.stored_ciphertext, key) {
            // Untouched since load: write the original bytes back
            (_, Some(ciphertext), _) => Some(ciphertext.clone()),
            (Expansion::Plaintext(text), None, Some(key)) => Some(crypto::encrypt(text, key)?),
            (Expansion::Plaintext(_), None, None) => None,
            (Expansion::Locked | Expansion::DecryptFailed, None, _) => None,
        }
    } else {
        match (&entry.expansion, &entry.stored_ciphertext) {
            (Expansion::Plaintext(text), _) => Some(text.clone()),
            (Expansion::Locked | Expansion::DecryptFailed, Some(ciphertext)) => {
                Some(ciphertext.clone())
            }
            (Expansion::Locked | Expansion::DecryptFailed, None) => None,
        }
    };

    Ok(replacement.map(|replacement| StoredExpansion {
        replacement,
        ignored: entry.ignored,
        tag: entry.category_id.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key;
    use crate::models::Category;
    use tempfile::TempDir;

    fn categories(dir: &TempDir) -> CategoryStore {
        CategoryStore::load(&dir.path().join("categories.json"))
    }

    fn write(path: &Path, json: &str) {
        fs::write(path, json).unwrap();
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = ExpansionStore::load(&dir.path().join("expansions.json"), &categories(&dir), None);
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_is_backed_up_and_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("expansions.json");
        write(&path, "{ broken");

        let store = ExpansionStore::load(&path, &categories(&dir), None);
        assert!(store.is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("expansions.json.bak")).unwrap(),
            "{ broken"
        );
    }

    #[test]
    fn plaintext_categories_load_as_is_and_legacy_values_migrate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("expansions.json");
        write(
            &path,
            r#"{
                "brb": { "replacement": "be right back", "ignored": true, "tag": "text" },
                "ty": "thank you"
            }"#,
        );

        let store = ExpansionStore::load(&path, &categories(&dir), None);
        let brb = store.get("brb").unwrap();
        assert!(brb.ignored);
        assert_eq!(brb.expansion, Expansion::Plaintext("be right back".into()));

        let ty = store.get("ty").unwrap();
        assert_eq!(ty.category_id, "text");
        assert!(!ty.ignored);
        assert_eq!(store.registry().lookup("ty"), Some("thank you"));
        assert!(!store.registry().contains("brb"));
    }

    #[test]
    fn encrypted_entries_unseal_with_the_key() {
        let dir = TempDir::new().unwrap();
        let cats = categories(&dir);
        let key = generate_key();
        let sealed = crypto::encrypt("hunter2", &key).unwrap();
        let record = StoredExpansion {
            replacement: sealed.clone(),
            ignored: false,
            tag: "passwords".into(),
        };

        let entry = unseal("pw".into(), record.clone(), &cats, Some(&key));
        assert_eq!(entry.expansion, Expansion::Plaintext("hunter2".into()));
        assert_eq!(entry.stored_ciphertext.as_deref(), Some(sealed.as_str()));

        let locked = unseal("pw".into(), record.clone(), &cats, None);
        assert_eq!(locked.expansion, Expansion::Locked);
        assert_eq!(locked.stored_ciphertext.as_deref(), Some(sealed.as_str()));

        let failed = unseal("pw".into(), record, &cats, Some(&generate_key()));
        assert_eq!(failed.expansion, Expansion::DecryptFailed);
    }

    #[test]
    fn untouched_ciphertext_is_written_back_verbatim() {
        let dir = TempDir::new().unwrap();
        let cats = categories(&dir);
        let key = generate_key();
        let path = dir.path().join("expansions.json");
        let sealed = crypto::encrypt("hunter2", &key).unwrap();
        write(
            &path,
            &format!(r#"{{ "pw": {{ "replacement": "{sealed}", "ignored": false, "tag": "passwords" }} }}"#),
        );

        for key in [Some(&key), None] {
            let store = ExpansionStore::load(&path, &cats, key);
            assert!(store.save(&cats, key).unwrap().is_empty());
            let reloaded = read_records(&path).unwrap();
            assert_eq!(reloaded["pw"].replacement, sealed);
        }
    }

    #[test]
    fn edited_entries_are_encrypted_fresh() {
        let dir = TempDir::new().unwrap();
        let cats = categories(&dir);
        let key = generate_key();
        let path = dir.path().join("expansions.json");

        let mut store = ExpansionStore::empty(&path);
        store.insert(AbbreviationEntry::new("pw".into(), "s3cret".into(), "passwords".into()));
        store.save(&cats, Some(&key)).unwrap();

        let on_disk = read_records(&path).unwrap();
        assert_ne!(on_disk["pw"].replacement, "s3cret");
        assert_eq!(crypto::decrypt(&on_disk["pw"].replacement, &key).unwrap(), "s3cret");
    }

    #[test]
    fn new_entries_in_locked_categories_are_skipped() {
        let dir = TempDir::new().unwrap();
        let cats = categories(&dir);
        let path = dir.path().join("expansions.json");

        let mut store = ExpansionStore::empty(&path);
        store.insert(AbbreviationEntry::new("pw".into(), "s3cret".into(), "passwords".into()));
        store.insert(AbbreviationEntry::new("brb".into(), "be right back".into(), "text".into()));

        let skipped = store.save(&cats, None).unwrap();
        assert_eq!(skipped, vec!["pw".to_string()]);

        let on_disk = read_records(&path).unwrap();
        assert!(!on_disk.contains_key("pw"));
        assert_eq!(on_disk["brb"].replacement, "be right back");
    }

    #[test]
    fn unknown_categories_are_treated_as_plaintext() {
        let dir = TempDir::new().unwrap();
        let mut cats = categories(&dir);
        cats.insert(Category::new("vault", "Vault", "🔐", "", "#000000").encrypted());
        let record = StoredExpansion {
            replacement: "visible".into(),
            ignored: false,
            tag: "nowhere".into(),
        };
        let entry = unseal("x".into(), record, &cats, None);
        assert_eq!(entry.expansion, Expansion::Plaintext("visible".into()));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap().replace(char::is_whitespace, ""), "[4]");
    }
}
