use crate::app::App;
use crate::categories::CategoryUpdate;
use crate::config::is_daemon_running;
use crate::models::{AbbreviationEntry, Category, Expansion, MutationOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The app as shared between the control API and the daemon loop
pub type SharedApp = Arc<Mutex<App>>;

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

impl ApiResponse<MutationOutcome> {
    /// Refusals keep the outcome as data so callers can branch on the reason
    pub fn from_outcome(outcome: MutationOutcome) -> Self {
        match outcome {
            MutationOutcome::Applied => Self::success(outcome),
            MutationOutcome::Refused(reason) => Self {
                success: false,
                data: Some(outcome),
                error: Some(reason.to_string()),
            },
        }
    }
}

/// An entry as shown to a UI. Sealed entries carry their label instead of
/// plaintext.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub trigger: String,
    pub expansion: String,
    pub sealed: bool,
    pub ignored: bool,
    pub category: String,
}

impl From<&AbbreviationEntry> for EntryView {
    fn from(entry: &AbbreviationEntry) -> Self {
        Self {
            trigger: entry.trigger.clone(),
            expansion: entry.expansion.to_string(),
            sealed: !matches!(entry.expansion, Expansion::Plaintext(_)),
            ignored: entry.ignored,
            category: entry.category_id.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CategoryView {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub color: String,
    pub deletable: bool,
    pub encrypted: bool,
}

impl From<&Category> for CategoryView {
    fn from(category: &Category) -> Self {
        Self {
            id: category.id.clone(),
            name: category.name.clone(),
            icon: category.icon.clone(),
            description: category.description.clone(),
            color: category.color.clone(),
            deletable: category.deletable,
            encrypted: category.encrypted,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusView {
    pub daemon_pid: Option<u32>,
    pub expansion_enabled: bool,
    pub locked: bool,
    pub active_category: Option<String>,
    pub entries: usize,
    pub active_triggers: usize,
    pub data_path: String,
}

#[derive(Deserialize, Debug)]
pub struct EntryBody {
    pub trigger: String,
    pub expansion: String,
    pub category: String,
}

#[derive(Deserialize, Debug)]
pub struct RenameBody {
    pub old_trigger: String,
    pub new_trigger: String,
    pub expansion: String,
}

#[derive(Deserialize, Debug)]
pub struct NewCategoryBody {
    /// Derived from `name` when omitted
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Deserialize, Debug)]
pub struct EditCategoryBody {
    pub id: String,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub encrypted: Option<bool>,
}

fn mutation(result: crate::error::Result<MutationOutcome>) -> ApiResponse<MutationOutcome> {
    match result {
        Ok(outcome) => ApiResponse::from_outcome(outcome),
        Err(e) => ApiResponse::error(format!("Failed to save changes: {}", e)),
    }
}

pub fn api_list_entries(app: &SharedApp, category: Option<&str>) -> ApiResponse<Vec<EntryView>> {
    let app = app.lock();
    let Some(category) = category.or(app.active_category()) else {
        return ApiResponse::success(Vec::new());
    };
    let entries = app.list_entries(category);
    ApiResponse::success(entries.iter().map(EntryView::from).collect())
}

pub fn api_add_entry(app: &SharedApp, body: EntryBody) -> ApiResponse<MutationOutcome> {
    mutation(
        app.lock()
            .add_or_update(&body.trigger, &body.expansion, &body.category),
    )
}

pub fn api_rename_entry(app: &SharedApp, body: RenameBody) -> ApiResponse<MutationOutcome> {
    mutation(
        app.lock()
            .rename_entry(&body.old_trigger, &body.new_trigger, &body.expansion),
    )
}

pub fn api_delete_entry(app: &SharedApp, trigger: &str) -> ApiResponse<MutationOutcome> {
    mutation(app.lock().delete(trigger))
}

pub fn api_toggle_entry(app: &SharedApp, trigger: &str) -> ApiResponse<MutationOutcome> {
    mutation(app.lock().toggle_ignored(trigger))
}

pub fn api_list_categories(app: &SharedApp) -> ApiResponse<Vec<CategoryView>> {
    let categories = app.lock().categories();
    ApiResponse::success(categories.iter().map(CategoryView::from).collect())
}

pub fn api_add_category(app: &SharedApp, body: NewCategoryBody) -> ApiResponse<MutationOutcome> {
    let mut app = app.lock();
    let id = match body.id {
        Some(id) => id,
        None => app.generate_category_id(&body.name),
    };
    let mut category = Category::new(&id, &body.name, &body.icon, &body.description, &body.color);
    category.encrypted = body.encrypted;
    mutation(app.add_category(category))
}

pub fn api_edit_category(app: &SharedApp, body: EditCategoryBody) -> ApiResponse<MutationOutcome> {
    let update = CategoryUpdate {
        name: body.name,
        icon: body.icon,
        description: body.description,
        color: body.color,
        encrypted: body.encrypted,
    };
    mutation(app.lock().edit_category(&body.id, update))
}

pub fn api_delete_category(app: &SharedApp, id: &str) -> ApiResponse<MutationOutcome> {
    mutation(app.lock().delete_category(id))
}

pub fn api_switch_category(app: &SharedApp, id: &str) -> ApiResponse<MutationOutcome> {
    ApiResponse::from_outcome(app.lock().switch_active_category(id))
}

pub fn api_set_expansion(app: &SharedApp, enabled: bool) -> ApiResponse<bool> {
    let app = app.lock();
    match app.set_expansion_enabled(enabled) {
        Ok(()) => ApiResponse::success(app.is_expansion_enabled()),
        Err(e) => ApiResponse::error(format!("Failed to change expansion state: {}", e)),
    }
}

pub fn api_buffer(app: &SharedApp) -> ApiResponse<String> {
    match app.lock().current_buffer_snapshot() {
        Some(snapshot) => ApiResponse::success(snapshot),
        None => ApiResponse::error("Expansion engine is not running".to_string()),
    }
}

pub fn api_reload(app: &SharedApp) -> ApiResponse<usize> {
    let mut app = app.lock();
    app.reload();
    ApiResponse::success(app.entry_count())
}

pub fn api_status(app: &SharedApp) -> ApiResponse<StatusView> {
    let daemon_pid = match is_daemon_running() {
        Ok(pid) => pid,
        Err(e) => return ApiResponse::error(format!("Failed to check daemon status: {}", e)),
    };

    let app = app.lock();
    ApiResponse::success(StatusView {
        daemon_pid,
        expansion_enabled: app.is_expansion_enabled(),
        locked: app.is_locked(),
        active_category: app.active_category().map(str::to_string),
        entries: app.entry_count(),
        active_triggers: app.active_trigger_count(),
        data_path: app.paths().expansions.to_string_lossy().to_string(),
    })
}
