use crate::error::{Result, TexError};
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use parking_lot::{Mutex, RwLock};
use rdev::{self, EventType, Key as RdevKey};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long to wait for the OS hook to report a startup failure
const LISTENER_STARTUP_GRACE_MS: u64 = 200;

/// Upper bound on waiting for the hook to go quiet after an injection
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// A key press as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(char),
    Space,
    Enter,
    Tab,
    Backspace,
    /// Any other non-printable key (arrows, modifiers, function keys...)
    Other,
}

/// A synthetic key the engine asks the source to type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticKey {
    Backspace,
    Text(String),
}

pub type KeyCallback = Arc<dyn Fn(KeyEvent) + Send + Sync>;

/// The OS keyboard hook as the engine sees it.
///
/// While capture is stopped the source must not deliver any event to the
/// callback, including events produced by its own `inject_keys`. Hooks
/// deliver injected keys on their own thread some time after injection,
/// so `inject_keys` is never called from inside the callback.
pub trait KeyEventSource: Send + Sync {
    fn on_key_event(&self, callback: KeyCallback);
    fn start_capture(&self) -> Result<()>;
    fn stop_capture(&self) -> Result<()>;
    fn inject_keys(&self, keys: &[SyntheticKey]) -> Result<()>;

    /// Block until keys from earlier `inject_keys` calls have reached the
    /// hook (and been dropped by the closed gate).
    fn drain_injected(&self, settle: Duration) {
        thread::sleep(settle);
    }
}

/// Pauses used while injecting, so target applications keep up
#[derive(Debug, Clone, Copy)]
pub struct InjectionTiming {
    pub backspace_delay: Duration,
    pub line_delay: Duration,
}

impl Default for InjectionTiming {
    fn default() -> Self {
        Self {
            backspace_delay: Duration::from_millis(2),
            line_delay: Duration::from_millis(10),
        }
    }
}

/// Convert an rdev event into a key press, `None` for releases and mouse
pub fn key_event_from_rdev(event: &rdev::Event) -> Option<KeyEvent> {
    let key = match event.event_type {
        EventType::KeyPress(key) => key,
        _ => return None,
    };

    let key_event = match key {
        RdevKey::Space => KeyEvent::Space,
        RdevKey::Return | RdevKey::KpReturn => KeyEvent::Enter,
        RdevKey::Tab => KeyEvent::Tab,
        RdevKey::Backspace => KeyEvent::Backspace,
        _ => printable_char(event.name.as_deref())
            .map(KeyEvent::Char)
            .unwrap_or(KeyEvent::Other),
    };
    Some(key_event)
}

/// The character a key produced, if it is a single printable one
fn printable_char(name: Option<&str>) -> Option<char> {
    let name = name?;
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => Some(c),
        _ => None,
    }
}

/// Create a keyboard controller
pub fn create_keyboard_controller() -> Result<Enigo> {
    Enigo::new(&Settings::default())
        .map_err(|err| TexError::Enigo(format!("Failed to create keyboard controller: {}", err)))
}

/// Send backspace key presses
pub fn send_backspace(keyboard: &mut impl Keyboard, count: usize, delay: Duration) -> Result<()> {
    for _ in 0..count {
        thread::sleep(delay);
        keyboard
            .key(Key::Backspace, Direction::Click)
            .map_err(|err| TexError::Enigo(format!("Failed to send backspace: {}", err)))?;
    }
    Ok(())
}

/// Type text, pressing Return between lines so editors see real newlines
pub fn type_text_with_formatting(
    keyboard: &mut impl Keyboard,
    text: &str,
    line_delay: Duration,
) -> Result<()> {
    // Keep single text() calls small enough for the platform input queue
    const CHUNK_SIZE: usize = 512;

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            keyboard
                .key(Key::Return, Direction::Click)
                .map_err(|err| TexError::Enigo(format!("Failed to type newline: {}", err)))?;
            thread::sleep(line_delay);
        }

        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(CHUNK_SIZE) {
            let chunk: String = chunk.iter().collect();
            keyboard
                .text(&chunk)
                .map_err(|err| TexError::Enigo(format!("Failed to type text: {}", err)))?;
        }
        if !line.is_empty() {
            thread::sleep(line_delay);
        }
    }

    Ok(())
}

/// Global keyboard hook backed by `rdev`, injecting through `enigo`.
///
/// `rdev::listen` never returns once the hook is installed, so the hook
/// thread is spawned on first start and capture is switched by a gate that
/// drops events on the hook thread before any callback sees them. Every
/// key press is counted, gated or not, so a drain can tell when the hook
/// has gone quiet.
pub struct RdevKeySource {
    capturing: Arc<AtomicBool>,
    observed: Arc<AtomicU64>,
    callback: Arc<RwLock<Option<KeyCallback>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    timing: InjectionTiming,
}

impl RdevKeySource {
    pub fn new(timing: InjectionTiming) -> Self {
        Self {
            capturing: Arc::new(AtomicBool::new(false)),
            observed: Arc::new(AtomicU64::new(0)),
            callback: Arc::new(RwLock::new(None)),
            listener: Mutex::new(None),
            timing,
        }
    }

    fn spawn_listener(&self) -> Result<JoinHandle<()>> {
        let capturing = Arc::clone(&self.capturing);
        let observed = Arc::clone(&self.observed);
        let callback = Arc::clone(&self.callback);
        let (failure_tx, failure_rx) = mpsc::channel::<String>();

        let handle = thread::Builder::new()
            .name("tex-key-listener".to_string())
            .spawn(move || {
                let result = rdev::listen(move |event| {
                    let Some(key_event) = key_event_from_rdev(&event) else {
                        return;
                    };
                    observed.fetch_add(1, Ordering::SeqCst);
                    if !capturing.load(Ordering::SeqCst) {
                        return;
                    }
                    let handler = callback.read().clone();
                    if let Some(handler) = handler {
                        handler(key_event);
                    }
                });

                if let Err(e) = result {
                    error!(error = ?e, "Keyboard listener stopped");
                    let _ = failure_tx.send(format!("{:?}", e));
                }
            })?;

        match failure_rx.recv_timeout(Duration::from_millis(LISTENER_STARTUP_GRACE_MS)) {
            Ok(reason) => Err(TexError::Listener(reason)),
            Err(_) => Ok(handle),
        }
    }
}

impl Default for RdevKeySource {
    fn default() -> Self {
        Self::new(InjectionTiming::default())
    }
}

impl KeyEventSource for RdevKeySource {
    fn on_key_event(&self, callback: KeyCallback) {
        *self.callback.write() = Some(callback);
    }

    fn start_capture(&self) -> Result<()> {
        let mut listener = self.listener.lock();
        let alive = listener
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);

        if !alive {
            info!("Installing global keyboard hook");
            *listener = Some(self.spawn_listener()?);
        }

        self.capturing.store(true, Ordering::SeqCst);
        debug!("Keyboard capture started");
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        debug!("Keyboard capture stopped");
        Ok(())
    }

    fn inject_keys(&self, keys: &[SyntheticKey]) -> Result<()> {
        let mut keyboard = create_keyboard_controller()?;

        for key in keys {
            match key {
                SyntheticKey::Backspace => {
                    send_backspace(&mut keyboard, 1, self.timing.backspace_delay)?
                }
                SyntheticKey::Text(text) => {
                    type_text_with_formatting(&mut keyboard, text, self.timing.line_delay)?
                }
            }
        }
        Ok(())
    }

    /// Wait for one full `settle` period in which the hook saw no key press
    fn drain_injected(&self, settle: Duration) {
        if settle.is_zero() {
            return;
        }

        let started = Instant::now();
        loop {
            let before = self.observed.load(Ordering::SeqCst);
            thread::sleep(settle);
            if self.observed.load(Ordering::SeqCst) == before {
                return;
            }
            if started.elapsed() >= DRAIN_LIMIT {
                warn!("Keyboard hook still busy after injection, resuming capture anyway");
                return;
            }
        }
    }
}
