//! The collaborator facade a UI or the control API drives.
//!
//! `App` owns both stores, the optional encryption key and the shared
//! registry. Every applied mutation is saved and the registry rebuilt
//! before the call returns. Callers serialize access (the daemon keeps the
//! `App` behind one mutex).

use crate::categories::{self, CategoryStore, CategoryUpdate};
use crate::config::{self, Settings};
use crate::crypto::{self, EncryptionKey, SecretStore};
use crate::error::{Result, TexError};
use crate::expander::TextExpander;
use crate::keyboard::KeyEventSource;
use crate::models::{AbbreviationEntry, Category, Expansion, MutationOutcome, Refusal};
use crate::registry::SharedRegistry;
use crate::storage::{self, ExpansionStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Where the two data files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub expansions: PathBuf,
    pub categories: PathBuf,
}

impl AppPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            expansions: dir.join(config::EXPANSIONS_FILENAME),
            categories: dir.join(config::CATEGORIES_FILENAME),
        }
    }

    pub fn from_config() -> Self {
        Self {
            expansions: config::get_expansions_file_path(),
            categories: config::get_categories_file_path(),
        }
    }
}

pub struct App {
    paths: AppPaths,
    secrets: Arc<dyn SecretStore>,
    settings: Settings,
    categories: CategoryStore,
    expansions: ExpansionStore,
    key: Option<EncryptionKey>,
    registry: Arc<SharedRegistry>,
    expander: Option<Arc<TextExpander>>,
    active_category: Option<String>,
    /// Data file modification times as of this app's last read or write
    known_stamps: HashMap<PathBuf, SystemTime>,
}

impl App {
    /// Load both stores and the key. Never fails: unreadable data falls
    /// back to defaults and an unavailable key leaves encrypted categories
    /// locked.
    pub fn load(paths: AppPaths, secrets: Arc<dyn SecretStore>, settings: Settings) -> Self {
        let mut app = Self {
            categories: CategoryStore::load(&paths.categories),
            expansions: ExpansionStore::empty(&paths.expansions),
            paths,
            secrets,
            settings,
            key: None,
            registry: Arc::new(SharedRegistry::default()),
            expander: None,
            active_category: None,
            known_stamps: HashMap::new(),
        };
        app.load_state();
        app
    }

    fn load_state(&mut self) {
        self.key = crypto::load_or_create_key(self.secrets.as_ref());
        self.expansions =
            ExpansionStore::load(&self.paths.expansions, &self.categories, self.key.as_ref());
        self.rebuild_registry();
        note_stamp(&mut self.known_stamps, &self.paths.categories);
        note_stamp(&mut self.known_stamps, &self.paths.expansions);

        let keep = self
            .active_category
            .as_deref()
            .map(|id| self.categories.exists(id))
            .unwrap_or(false);
        if !keep {
            self.active_category = self.fallback_category();
        }

        info!(
            entries = self.expansions.len(),
            categories = self.categories.len(),
            locked = self.is_locked(),
            "Store loaded"
        );
    }

    /// Build the expansion engine over this app's registry. Expansion
    /// starts disabled.
    pub fn attach_engine(&mut self, source: Arc<dyn KeyEventSource>) -> Arc<TextExpander> {
        let expander = TextExpander::new(source, Arc::clone(&self.registry), &self.settings);
        self.expander = Some(Arc::clone(&expander));
        expander
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Whether `stamp` is the modification time this app left `path` with,
    /// so a watcher can tell its own saves from edits by other processes
    pub fn knows_stamp(&self, path: &Path, stamp: Option<SystemTime>) -> bool {
        match stamp {
            Some(stamp) => self.known_stamps.get(path) == Some(&stamp),
            None => false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> Arc<SharedRegistry> {
        Arc::clone(&self.registry)
    }

    /// No key is available, so encrypted categories are sealed
    pub fn is_locked(&self) -> bool {
        self.key.is_none()
    }

    pub fn active_category(&self) -> Option<&str> {
        self.active_category.as_deref()
    }

    pub fn switch_active_category(&mut self, id: &str) -> MutationOutcome {
        if !self.categories.exists(id) {
            return MutationOutcome::Refused(Refusal::UnknownCategory);
        }
        debug!(category = %id, "Switching active category");
        self.active_category = Some(id.to_string());
        MutationOutcome::Applied
    }

    /// Entries of one category, sealed ones included
    pub fn list_entries(&self, category_id: &str) -> Vec<AbbreviationEntry> {
        self.expansions.in_category(category_id).cloned().collect()
    }

    pub fn entry(&self, trigger: &str) -> Option<&AbbreviationEntry> {
        self.expansions.get(trigger)
    }

    pub fn entry_count(&self) -> usize {
        self.expansions.len()
    }

    pub fn active_trigger_count(&self) -> usize {
        self.registry.snapshot().len()
    }

    /// Insert a new entry or replace the expansion of an existing one
    pub fn add_or_update(
        &mut self,
        trigger: &str,
        expansion: &str,
        category_id: &str,
    ) -> Result<MutationOutcome> {
        let trigger = trigger.trim();
        let expansion = expansion.trim();
        if !is_valid_trigger(trigger) || expansion.is_empty() {
            return Ok(MutationOutcome::Refused(Refusal::InvalidInput));
        }
        if !self.categories.exists(category_id) {
            return Ok(MutationOutcome::Refused(Refusal::UnknownCategory));
        }
        if let Some(refusal) = self.category_guard(category_id) {
            return Ok(MutationOutcome::Refused(refusal));
        }
        if let Some(existing) = self.expansions.get(trigger) {
            if let Some(refusal) = self.entry_guard(existing) {
                return Ok(MutationOutcome::Refused(refusal));
            }
        }

        match self.expansions.get_mut(trigger) {
            Some(entry) => {
                entry.update_expansion(expansion.to_string());
                entry.category_id = category_id.to_string();
                entry.ignored = false;
            }
            None => self.expansions.insert(AbbreviationEntry::new(
                trigger.to_string(),
                expansion.to_string(),
                category_id.to_string(),
            )),
        }

        debug!(trigger = %trigger, category = %category_id, "Saved entry");
        self.commit_entries()?;
        Ok(MutationOutcome::Applied)
    }

    /// Edit in place: replace `old` with `new` carrying `expansion`, keeping
    /// the entry's category and ignored flag.
    pub fn rename_entry(&mut self, old: &str, new: &str, expansion: &str) -> Result<MutationOutcome> {
        let new = new.trim();
        let expansion = expansion.trim();
        if !is_valid_trigger(new) || expansion.is_empty() {
            return Ok(MutationOutcome::Refused(Refusal::InvalidInput));
        }
        let Some(existing) = self.expansions.get(old) else {
            return Ok(MutationOutcome::Refused(Refusal::NotFound));
        };
        if let Some(refusal) = self.entry_guard(existing) {
            return Ok(MutationOutcome::Refused(refusal));
        }
        if new != old && self.expansions.get(new).is_some() {
            return Ok(MutationOutcome::Refused(Refusal::AlreadyExists));
        }

        let Some(mut entry) = self.expansions.remove(old) else {
            return Ok(MutationOutcome::Refused(Refusal::NotFound));
        };
        entry.trigger = new.to_string();
        entry.update_expansion(expansion.to_string());
        self.expansions.insert(entry);

        debug!(from = %old, to = %new, "Renamed entry");
        self.commit_entries()?;
        Ok(MutationOutcome::Applied)
    }

    pub fn delete(&mut self, trigger: &str) -> Result<MutationOutcome> {
        let Some(existing) = self.expansions.get(trigger) else {
            return Ok(MutationOutcome::Refused(Refusal::NotFound));
        };
        if let Some(refusal) = self.category_guard(&existing.category_id) {
            return Ok(MutationOutcome::Refused(refusal));
        }

        self.expansions.remove(trigger);
        debug!(trigger = %trigger, "Deleted entry");
        self.commit_entries()?;
        Ok(MutationOutcome::Applied)
    }

    pub fn toggle_ignored(&mut self, trigger: &str) -> Result<MutationOutcome> {
        let Some(existing) = self.expansions.get(trigger) else {
            return Ok(MutationOutcome::Refused(Refusal::NotFound));
        };
        if let Some(refusal) = self.category_guard(&existing.category_id) {
            return Ok(MutationOutcome::Refused(refusal));
        }

        if let Some(entry) = self.expansions.get_mut(trigger) {
            entry.ignored = !entry.ignored;
            debug!(trigger = %trigger, ignored = entry.ignored, "Toggled entry");
        }
        self.commit_entries()?;
        Ok(MutationOutcome::Applied)
    }

    pub fn set_expansion_enabled(&self, enabled: bool) -> Result<()> {
        match &self.expander {
            Some(expander) => expander.set_enabled(enabled),
            None => Err(TexError::Other("expansion engine is not running".into())),
        }
    }

    pub fn is_expansion_enabled(&self) -> bool {
        self.expander
            .as_ref()
            .map(|expander| expander.is_enabled())
            .unwrap_or(false)
    }

    /// Diagnostics only. `None` when no engine is attached.
    pub fn current_buffer_snapshot(&self) -> Option<String> {
        self.expander
            .as_ref()
            .map(|expander| expander.buffer_snapshot())
    }

    /// Re-read categories, key and entries from disk
    pub fn reload(&mut self) {
        self.categories = CategoryStore::load(&self.paths.categories);
        self.load_state();
    }

    pub fn categories(&self) -> Vec<Category> {
        self.categories.all().cloned().collect()
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn generate_category_id(&self, name: &str) -> String {
        self.categories.generate_category_id(name)
    }

    pub fn validate_category_id(&self, id: &str) -> bool {
        categories::validate_category_id(id)
    }

    pub fn add_category(&mut self, category: Category) -> Result<MutationOutcome> {
        let outcome = self.categories.add_category(category);
        if outcome.is_applied() {
            self.commit_categories()?;
        }
        Ok(outcome)
    }

    pub fn edit_category(&mut self, id: &str, update: CategoryUpdate) -> Result<MutationOutcome> {
        let Some(category) = self.categories.get(id) else {
            return Ok(MutationOutcome::Refused(Refusal::NotFound));
        };

        if let Some(encrypted) = update.encrypted {
            if encrypted != category.encrypted {
                if self.is_locked() {
                    return Ok(MutationOutcome::Refused(Refusal::Locked));
                }
                if !encrypted && self.expansions.in_category(id).any(|e| e.expansion.is_sealed()) {
                    return Ok(MutationOutcome::Refused(Refusal::SealedEntries));
                }
            }
        }

        let outcome = self.categories.edit_category(id, update);
        if outcome.is_applied() {
            self.commit_categories()?;
            // Encryption changes how entries are written
            self.commit_entries()?;
        }
        Ok(outcome)
    }

    /// Delete a category together with its entries
    pub fn delete_category(&mut self, id: &str) -> Result<MutationOutcome> {
        let Some(category) = self.categories.get(id) else {
            return Ok(MutationOutcome::Refused(Refusal::NotFound));
        };
        if !category.deletable {
            return Ok(MutationOutcome::Refused(Refusal::NotDeletable));
        }
        if category.encrypted && self.is_locked() && self.expansions.in_category(id).next().is_some() {
            return Ok(MutationOutcome::Refused(Refusal::Locked));
        }

        let outcome = self.categories.delete_category(id);
        if outcome.is_applied() {
            let removed = self.expansions.remove_category(id);
            info!(category = %id, removed, "Deleted category");
            self.commit_categories()?;
            self.commit_entries()?;
            if self.active_category.as_deref() == Some(id) {
                self.active_category = self.fallback_category();
            }
        }
        Ok(outcome)
    }

    /// Refusal for writing into `category_id` in the current key state
    fn category_guard(&self, category_id: &str) -> Option<Refusal> {
        (self.categories.is_encrypted(category_id) && self.is_locked()).then_some(Refusal::Locked)
    }

    /// Refusal for editing `entry` in the current key state
    fn entry_guard(&self, entry: &AbbreviationEntry) -> Option<Refusal> {
        match entry.expansion {
            Expansion::Locked => Some(Refusal::Locked),
            Expansion::DecryptFailed => Some(Refusal::DecryptFailed),
            Expansion::Plaintext(_) => self.category_guard(&entry.category_id),
        }
    }

    fn fallback_category(&self) -> Option<String> {
        let locked = self.is_locked();
        self.categories
            .all()
            .find(|category| !(locked && category.encrypted))
            .or_else(|| self.categories.all().next())
            .map(|category| category.id.clone())
    }

    fn rebuild_registry(&self) {
        self.registry.replace(self.expansions.registry());
    }

    fn commit_entries(&mut self) -> Result<()> {
        self.rebuild_registry();
        let skipped = self.expansions.save(&self.categories, self.key.as_ref())?;
        note_stamp(&mut self.known_stamps, &self.paths.expansions);
        if !skipped.is_empty() {
            warn!(count = skipped.len(), "Some entries were not written");
        }
        Ok(())
    }

    fn commit_categories(&mut self) -> Result<()> {
        self.categories.save()?;
        note_stamp(&mut self.known_stamps, &self.paths.categories);
        Ok(())
    }
}

fn note_stamp(stamps: &mut HashMap<PathBuf, SystemTime>, path: &Path) {
    match storage::modified(path) {
        Some(stamp) => {
            stamps.insert(path.to_path_buf(), stamp);
        }
        None => {
            stamps.remove(path);
        }
    }
}

fn is_valid_trigger(trigger: &str) -> bool {
    !trigger.is_empty() && !trigger.chars().any(char::is_whitespace)
}
