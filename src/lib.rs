//! TEx - a background abbreviation expander.
//!
//! Typed triggers are replaced in place by their expansions as soon as they
//! are completed with a space. Expansions of encrypted categories are kept
//! encrypted at rest with a key held in the platform secret store.

pub mod api;
pub mod app;
pub mod buffer;
pub mod categories;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod expander;
pub mod keyboard;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;

// Re-export
pub use api::{ApiResponse, SharedApp};
pub use app::{App, AppPaths};
pub use categories::{CategoryStore, CategoryUpdate};
pub use config::{get_config_dir, is_daemon_running, Settings};
pub use crypto::{EncryptionKey, KeyringStore, MemorySecretStore, SecretStore};
pub use daemon::{daemon_status, run_daemon_worker, run_foreground, start_daemon, stop_daemon};
pub use error::{Result, TexError};
pub use executor::CaptureState;
pub use expander::TextExpander;
pub use keyboard::{KeyCallback, KeyEvent, KeyEventSource, RdevKeySource, SyntheticKey};
pub use models::{AbbreviationEntry, Category, Expansion, MutationOutcome, Refusal};
pub use registry::{AbbreviationRegistry, SharedRegistry};
pub use server::{start_api_server, ApiAccess};
pub use storage::ExpansionStore;
