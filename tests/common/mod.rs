#![allow(dead_code)]

use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tex_expander::{
    App, AppPaths, KeyCallback, KeyEvent, KeyEventSource, MemorySecretStore, Result, SecretStore,
    Settings, SyntheticKey,
};

/// Key source that lets a test type like a user and records what the
/// engine types back.
#[derive(Default)]
pub struct ScriptedKeySource {
    capturing: AtomicBool,
    callback: Mutex<Option<KeyCallback>>,
    injected: Mutex<Vec<SyntheticKey>>,
}

impl ScriptedKeySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn type_str(&self, text: &str) {
        for c in text.chars() {
            if !self.capturing.load(Ordering::SeqCst) {
                continue;
            }
            let event = match c {
                ' ' => KeyEvent::Space,
                '\n' => KeyEvent::Enter,
                '\t' => KeyEvent::Tab,
                _ => KeyEvent::Char(c),
            };
            let callback = self.callback.lock().clone();
            if let Some(callback) = callback {
                callback(event);
            }
        }
    }

    pub fn injected(&self) -> Vec<SyntheticKey> {
        self.injected.lock().clone()
    }
}

impl KeyEventSource for ScriptedKeySource {
    fn on_key_event(&self, callback: KeyCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn start_capture(&self) -> Result<()> {
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn inject_keys(&self, keys: &[SyntheticKey]) -> Result<()> {
        self.injected.lock().extend_from_slice(keys);
        Ok(())
    }
}

/// How long a test waits for an in-flight expansion to finish
pub const SETTLE: Duration = Duration::from_secs(5);

pub fn quiet_settings() -> Settings {
    Settings {
        settle_delay_ms: 0,
        ..Settings::default()
    }
}

pub fn open_app(dir: &Path, secrets: Arc<dyn SecretStore>) -> App {
    App::load(AppPaths::in_dir(dir), secrets, quiet_settings())
}

/// A secret store holding a freshly generated key
pub fn keyed_store() -> Arc<MemorySecretStore> {
    let store = Arc::new(MemorySecretStore::new());
    tex_expander::crypto::load_or_create_key(store.as_ref()).expect("key");
    store
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read file")
}

pub fn backspaces_then(count: usize, text: &str) -> Vec<SyntheticKey> {
    let mut keys = vec![SyntheticKey::Backspace; count];
    keys.push(SyntheticKey::Text(text.to_string()));
    keys
}
