use crate::app::{App, AppPaths};
use crate::categories::CategoryUpdate;
use crate::config::{
    ensure_config_dir, get_api_token_path, get_settings_file_path, load_or_create_api_token,
    Settings,
};
use crate::crypto::KeyringStore;
use crate::error::{Result, TexError};
use crate::models::{Category, Expansion, MutationOutcome};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    about = "tex: expand abbreviations as you type",
)]
pub struct Tex {
    #[clap(subcommand)]
    pub commands: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the expansion daemon in the background
    Start,
    /// Stop the expansion daemon
    Stop,
    /// Check if the daemon is running
    Status,
    /// Run the expansion engine in the foreground
    Run,
    /// List abbreviations of a category
    List {
        #[clap(long, short, help = "Category id, defaults to the first category")]
        category: Option<String>,
    },
    /// Add an abbreviation or replace its expansion
    Add {
        #[clap(long, short, help = "Trigger typed as a standalone word")]
        trigger: String,

        #[clap(long, short, help = "Text the trigger expands to")]
        expansion: String,

        #[clap(long, short, default_value = "text", help = "Category id")]
        category: String,
    },
    /// Rename an abbreviation and set its expansion
    Rename {
        #[clap(long, short, help = "Current trigger")]
        from: String,

        #[clap(long, short, help = "New trigger")]
        to: String,

        #[clap(long, short, help = "New expansion")]
        expansion: String,
    },
    /// Delete an abbreviation
    Delete {
        #[clap(long, short, help = "Trigger to delete")]
        trigger: String,
    },
    /// Ignore or re-enable an abbreviation
    Toggle {
        #[clap(long, short, help = "Trigger to toggle")]
        trigger: String,
    },
    /// List categories
    Categories,
    /// Manage categories
    Category {
        #[clap(subcommand)]
        action: CategoryAction,
    },
    /// Print the bearer token clients send to the control API
    Token,
    #[clap(hide = true)]
    DaemonWorker,
}

#[derive(Subcommand)]
pub enum CategoryAction {
    /// Add a category
    Add {
        #[clap(long, short, help = "Display name")]
        name: String,

        #[clap(long, help = "Category id, derived from the name when omitted")]
        id: Option<String>,

        #[clap(long, short, default_value = "", help = "Icon, usually an emoji")]
        icon: String,

        #[clap(long, short, default_value = "")]
        description: String,

        #[clap(long, short, default_value = "", help = "Color as #RRGGBB")]
        color: String,

        #[clap(long, help = "Encrypt expansions of this category at rest")]
        encrypted: bool,
    },
    /// Edit a category
    Edit {
        #[clap(help = "Category id")]
        id: String,

        #[clap(long, short)]
        name: Option<String>,

        #[clap(long, short)]
        icon: Option<String>,

        #[clap(long, short)]
        description: Option<String>,

        #[clap(long, short)]
        color: Option<String>,

        #[clap(long, help = "Turn encryption on or off")]
        encrypted: Option<bool>,
    },
    /// Delete a category and its abbreviations
    Delete {
        #[clap(help = "Category id")]
        id: String,
    },
}

/// Load the app from the configured directory and the platform keyring
pub fn load_app() -> Result<App> {
    ensure_config_dir()?;
    let settings = Settings::load(&get_settings_file_path());
    Ok(App::load(
        AppPaths::from_config(),
        Arc::new(KeyringStore::default()),
        settings,
    ))
}

fn report(outcome: MutationOutcome, done: &str) -> Result<()> {
    match outcome {
        MutationOutcome::Applied => {
            println!("{}", done);
            Ok(())
        }
        MutationOutcome::Refused(reason) => Err(TexError::InvalidInput(format!("refused: {}", reason))),
    }
}

pub fn list_entries(app: &App, category: Option<String>) -> Result<()> {
    let category = match category.or_else(|| app.active_category().map(str::to_string)) {
        Some(category) => category,
        None => return Err(TexError::InvalidInput("no categories defined".into())),
    };
    if app.category(&category).is_none() {
        return Err(TexError::InvalidInput(format!("unknown category '{}'", category)));
    }

    let entries = app.list_entries(&category);
    if entries.is_empty() {
        println!("No abbreviations in '{}'", category);
        return Ok(());
    }

    let width = entries.iter().map(|e| e.trigger.chars().count()).max().unwrap_or(0);
    for entry in entries {
        let marker = match (&entry.expansion, entry.ignored) {
            (Expansion::Plaintext(_), false) => " ",
            (Expansion::Plaintext(_), true) => "-",
            (Expansion::Locked | Expansion::DecryptFailed, _) => "!",
        };
        println!(
            "{} {:<width$}  {}",
            marker,
            entry.trigger,
            entry.expansion,
            width = width
        );
    }
    Ok(())
}

pub fn list_categories(app: &App) {
    for category in app.categories() {
        let lock = if category.encrypted { " [encrypted]" } else { "" };
        println!(
            "{} {:<12} {} {}{}",
            category.icon, category.id, category.name, category.color, lock
        );
    }
    if app.is_locked() {
        println!("Encryption key unavailable: encrypted categories are locked");
    }
}

pub fn run_category_action(app: &mut App, action: CategoryAction) -> Result<()> {
    match action {
        CategoryAction::Add {
            name,
            id,
            icon,
            description,
            color,
            encrypted,
        } => {
            let id = id.unwrap_or_else(|| app.generate_category_id(&name));
            let mut category = Category::new(&id, &name, &icon, &description, &color);
            category.encrypted = encrypted;
            report(app.add_category(category)?, &format!("Added category '{}'", id))
        }
        CategoryAction::Edit {
            id,
            name,
            icon,
            description,
            color,
            encrypted,
        } => {
            let update = CategoryUpdate {
                name,
                icon,
                description,
                color,
                encrypted,
            };
            report(app.edit_category(&id, update)?, &format!("Updated category '{}'", id))
        }
        CategoryAction::Delete { id } => {
            report(app.delete_category(&id)?, &format!("Deleted category '{}'", id))
        }
    }
}

pub fn print_api_token() -> Result<()> {
    ensure_config_dir()?;
    println!("{}", load_or_create_api_token(&get_api_token_path())?);
    Ok(())
}

/// Run one store command against a freshly loaded app
pub fn run_store_command(command: Commands) -> Result<()> {
    let mut app = load_app()?;
    match command {
        Commands::List { category } => list_entries(&app, category),
        Commands::Add {
            trigger,
            expansion,
            category,
        } => report(
            app.add_or_update(&trigger, &expansion, &category)?,
            &format!("Saved '{}'", trigger.trim()),
        ),
        Commands::Rename {
            from,
            to,
            expansion,
        } => report(
            app.rename_entry(&from, &to, &expansion)?,
            &format!("Renamed '{}' to '{}'", from, to.trim()),
        ),
        Commands::Delete { trigger } => {
            report(app.delete(&trigger)?, &format!("Deleted '{}'", trigger))
        }
        Commands::Toggle { trigger } => {
            let outcome = app.toggle_ignored(&trigger)?;
            let state = match app.entry(&trigger) {
                Some(entry) if entry.ignored => "ignored",
                _ => "active",
            };
            report(outcome, &format!("'{}' is now {}", trigger, state))
        }
        Commands::Categories => {
            list_categories(&app);
            Ok(())
        }
        Commands::Category { action } => run_category_action(&mut app, action),
        Commands::Start
        | Commands::Stop
        | Commands::Status
        | Commands::Run
        | Commands::Token
        | Commands::DaemonWorker => Err(TexError::Other("not a store command".into())),
    }
}
