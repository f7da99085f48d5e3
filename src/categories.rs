use crate::error::Result;
use crate::models::{Category, MutationOutcome, Refusal, DEFAULT_COLOR, DEFAULT_ICON};
use crate::storage::{back_up_unreadable, write_json_atomic};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Partial edit of a category. `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub encrypted: Option<bool>,
}

pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new("emoji", "Emoji", "😀", "Emoji shortcuts and emoticons", "#FFD700"),
        Category::new("sticker", "Sticker", "🎯", "Stickers and reaction images", "#FF6B6B"),
        Category::new("text", "Text", "📝", "Text snippets and templates", "#4ECDC4"),
        Category::new("link", "Link", "🔗", "URLs and web links", "#45B7D1"),
        Category::new(
            "passwords",
            "Passwords",
            "🔑",
            "Securely stored passwords and sensitive data",
            "#FF4500",
        )
        .encrypted(),
    ]
}

/// At least two characters, letters, digits and underscores only
pub fn validate_category_id(id: &str) -> bool {
    if id.chars().count() < 2 {
        return false;
    }
    let mut stripped = id.chars().filter(|c| *c != '_').peekable();
    stripped.peek().is_some() && stripped.all(char::is_alphanumeric)
}

/// `#RRGGBB`
pub fn validate_color(color: &str) -> bool {
    let Some(hex) = color.strip_prefix('#') else {
        return false;
    };
    hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Persisted category metadata from `categories.json`
#[derive(Debug, Clone)]
pub struct CategoryStore {
    path: PathBuf,
    categories: BTreeMap<String, Category>,
}

impl CategoryStore {
    /// Load categories. A missing file is seeded with the defaults and
    /// written out; an unreadable one falls back to the defaults in memory.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            let store = Self::with_defaults(path);
            if let Err(e) = store.save() {
                warn!(path = %path.display(), error = %e, "Could not write default categories");
            } else {
                info!(path = %path.display(), "Created default categories");
            }
            return store;
        }

        match Self::read(path) {
            Ok(categories) => {
                debug!(count = categories.len(), "Loaded categories");
                Self {
                    path: path.to_path_buf(),
                    categories,
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load categories, using defaults");
                back_up_unreadable(path);
                Self::with_defaults(path)
            }
        }
    }

    fn with_defaults(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            categories: default_categories()
                .into_iter()
                .map(|category| (category.id.clone(), category))
                .collect(),
        }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, Category>> {
        let content = fs::read_to_string(path)?;
        let mut categories: BTreeMap<String, Category> = serde_json::from_str(&content)?;
        for (id, category) in categories.iter_mut() {
            category.id = id.clone();
        }
        Ok(categories)
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.categories)
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.categories.contains_key(id)
    }

    /// Unknown categories count as unencrypted
    pub fn is_encrypted(&self, id: &str) -> bool {
        self.categories.get(id).map(|c| c.encrypted).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Insert or replace without validation
    pub fn insert(&mut self, category: Category) {
        self.categories.insert(category.id.clone(), category);
    }

    /// A fresh id derived from `name`, suffixed with `_1`, `_2`, ... until it
    /// is unused.
    pub fn generate_category_id(&self, name: &str) -> String {
        let mut base: String = name
            .to_lowercase()
            .replace(' ', "_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !base.starts_with(|c: char| c.is_ascii_alphabetic()) {
            base = format!("category_{base}");
        }

        let mut id = base.clone();
        let mut counter = 1;
        while self.exists(&id) {
            id = format!("{base}_{counter}");
            counter += 1;
        }
        id
    }

    /// Add a new deletable category. Empty icon and color fall back to the
    /// defaults. Nothing is saved.
    pub fn add_category(&mut self, mut category: Category) -> MutationOutcome {
        if self.exists(&category.id) {
            return MutationOutcome::Refused(Refusal::AlreadyExists);
        }
        category.name = category.name.trim().to_string();
        category.icon = category.icon.trim().to_string();
        category.color = category.color.trim().to_string();
        if category.icon.is_empty() {
            category.icon = DEFAULT_ICON.to_string();
        }
        if category.color.is_empty() {
            category.color = DEFAULT_COLOR.to_string();
        }

        if !validate_category_id(&category.id)
            || category.name.is_empty()
            || !validate_color(&category.color)
        {
            return MutationOutcome::Refused(Refusal::InvalidInput);
        }

        category.deletable = true;
        debug!(id = %category.id, encrypted = category.encrypted, "Adding category");
        self.insert(category);
        MutationOutcome::Applied
    }

    /// Apply a partial edit. Nothing is saved.
    pub fn edit_category(&mut self, id: &str, update: CategoryUpdate) -> MutationOutcome {
        let Some(category) = self.categories.get_mut(id) else {
            return MutationOutcome::Refused(Refusal::NotFound);
        };

        let name = update.name.map(|n| n.trim().to_string());
        let color = update.color.map(|c| {
            let c = c.trim();
            if c.is_empty() {
                DEFAULT_COLOR.to_string()
            } else {
                c.to_string()
            }
        });
        if matches!(name.as_deref(), Some("")) || matches!(color.as_deref(), Some(c) if !validate_color(c)) {
            return MutationOutcome::Refused(Refusal::InvalidInput);
        }

        if let Some(name) = name {
            category.name = name;
        }
        if let Some(icon) = update.icon {
            let icon = icon.trim();
            category.icon = if icon.is_empty() { DEFAULT_ICON } else { icon }.to_string();
        }
        if let Some(description) = update.description {
            category.description = description.trim().to_string();
        }
        if let Some(color) = color {
            category.color = color;
        }
        if let Some(encrypted) = update.encrypted {
            category.encrypted = encrypted;
        }
        MutationOutcome::Applied
    }

    /// Remove a deletable category. Nothing is saved.
    pub fn delete_category(&mut self, id: &str) -> MutationOutcome {
        match self.categories.get(id) {
            None => MutationOutcome::Refused(Refusal::NotFound),
            Some(category) if !category.deletable => {
                MutationOutcome::Refused(Refusal::NotDeletable)
            }
            Some(_) => {
                self.categories.remove(id);
                MutationOutcome::Applied
            }
        }
    }
}
