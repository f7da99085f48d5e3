//! The expansion engine: one owned state object tying the key source, the
//! input buffer, the matcher and the executor together.
//!
//! Every key event and every enable/disable call goes through the same
//! mutex, so the listener thread and the control thread never interleave
//! inside an expansion or race each other into starting the hook twice.
//!
//! The listener thread only closes the capture gate and hands the match to
//! the expansion worker. Typing happens on the worker, so the hook thread
//! stays free to receive (and drop) the synthetic keys while the gate is
//! closed.

use crate::buffer::InputBuffer;
use crate::config::Settings;
use crate::error::Result;
use crate::executor::{CaptureState, ExpansionExecutor};
use crate::keyboard::{KeyEvent, KeyEventSource};
use crate::matcher::{self, TriggerMatch};
use crate::registry::SharedRegistry;
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

struct EngineState {
    buffer: InputBuffer,
    capture: CaptureState,
    jobs: Option<Sender<TriggerMatch>>,
}

pub struct TextExpander {
    state: Mutex<EngineState>,
    idle: Condvar,
    source: Arc<dyn KeyEventSource>,
    registry: Arc<SharedRegistry>,
    executor: ExpansionExecutor,
}

impl TextExpander {
    /// Build the engine, start its expansion worker and subscribe it to the
    /// source's key events. Expansion starts disabled.
    pub fn new(
        source: Arc<dyn KeyEventSource>,
        registry: Arc<SharedRegistry>,
        settings: &Settings,
    ) -> Arc<Self> {
        let executor = ExpansionExecutor::new(
            Arc::clone(&source),
            Duration::from_millis(settings.settle_delay_ms),
        );

        let expander = Arc::new(Self {
            state: Mutex::new(EngineState {
                buffer: InputBuffer::new(settings.buffer_capacity),
                capture: CaptureState::Disabled,
                jobs: None,
            }),
            idle: Condvar::new(),
            source,
            registry,
            executor,
        });

        let (tx, rx) = mpsc::channel();
        let worker = Arc::downgrade(&expander);
        match thread::Builder::new()
            .name("tex-expansion".to_string())
            .spawn(move || run_expansions(worker, rx))
        {
            Ok(_) => expander.state.lock().jobs = Some(tx),
            Err(e) => error!(error = %e, "Could not start the expansion worker, triggers will not fire"),
        }

        let weak: Weak<Self> = Arc::downgrade(&expander);
        expander.source.on_key_event(Arc::new(move |event| {
            if let Some(expander) = weak.upgrade() {
                expander.handle_key(event);
            }
        }));

        expander
    }

    /// Turn expansion on or off. Repeating the current state is a no-op.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.start()
        } else {
            self.stop()
        }
    }

    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.capture != CaptureState::Disabled {
            debug!("Expansion already enabled");
            return Ok(());
        }

        match self.source.start_capture() {
            Ok(()) => {
                state.capture = CaptureState::Listening;
                info!("Text expansion enabled");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start keyboard capture, expansion stays disabled");
                Err(e)
            }
        }
    }

    /// Switch expansion off. An expansion already typing finishes, but
    /// capture is not reopened afterwards.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.capture == CaptureState::Disabled {
            debug!("Expansion already disabled");
            return Ok(());
        }

        state.capture = CaptureState::Disabled;
        info!("Text expansion disabled");
        self.source.stop_capture().map_err(|e| {
            error!(error = %e, "Failed to stop keyboard capture");
            e
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().capture != CaptureState::Disabled
    }

    pub fn capture_state(&self) -> CaptureState {
        self.state.lock().capture
    }

    /// Block until no expansion is in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.capture == CaptureState::Suspended {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.capture != CaptureState::Suspended;
            }
        }
        true
    }

    /// Read-only copy of the input buffer for diagnostics
    pub fn buffer_snapshot(&self) -> String {
        self.state.lock().buffer.snapshot()
    }

    /// Feed one key press from the listener
    pub fn handle_key(&self, event: KeyEvent) {
        let mut guard = self.state.lock();
        if guard.capture != CaptureState::Listening {
            return;
        }

        let state = &mut *guard;
        match event {
            KeyEvent::Char(c) => state.buffer.append(c),
            KeyEvent::Space => self.complete_word(state, ' '),
            KeyEvent::Enter => self.complete_word(state, '\n'),
            KeyEvent::Tab => self.complete_word(state, '\t'),
            KeyEvent::Backspace => state.buffer.clear(),
            KeyEvent::Other => {}
        }
    }

    fn complete_word(&self, state: &mut EngineState, boundary: char) {
        state.buffer.append_control(boundary);

        let registry = self.registry.snapshot();
        let Some(found) = matcher::check(&state.buffer, &registry) else {
            return;
        };
        let Some(jobs) = state.jobs.as_ref() else {
            warn!(trigger = %found.trigger, "Expansion worker is not running");
            return;
        };

        if let Err(e) = self.executor.suspend(&mut state.capture) {
            warn!(trigger = %found.trigger, error = %e, "Could not suspend capture, expansion skipped");
            return;
        }

        info!(trigger = %found.trigger, "Expanding abbreviation");
        if let Err(mpsc::SendError(found)) = jobs.send(found) {
            error!(trigger = %found.trigger, "Expansion worker stopped");
            state.jobs = None;
            self.settle(state);
        }
    }

    /// Clear the buffer and reopen capture after an expansion
    fn settle(&self, state: &mut EngineState) {
        state.buffer.clear();
        // A failed resume is logged and leaves the engine disabled
        let _ = self.executor.resume(&mut state.capture);
        self.idle.notify_all();
    }

    fn finish_expansion(&self) {
        let mut state = self.state.lock();
        self.settle(&mut state);
    }
}

/// Reopens capture when one expansion is done, including by unwinding
struct ResumeOnDrop<'a>(&'a TextExpander);

impl Drop for ResumeOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish_expansion();
    }
}

fn run_expansions(engine: Weak<TextExpander>, jobs: Receiver<TriggerMatch>) {
    for found in jobs {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        let _resume = ResumeOnDrop(engine.as_ref());

        if let Err(e) = engine.executor.replace(&found) {
            warn!(trigger = %found.trigger, error = %e, "Expansion failed");
        }
    }
    debug!("Expansion worker stopped");
}

impl Drop for TextExpander {
    fn drop(&mut self) {
        if self.state.get_mut().capture != CaptureState::Disabled {
            let _ = self.source.stop_capture();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::testing::{HookThreadKeySource, RecordingKeySource};
    use crate::keyboard::SyntheticKey;
    use crate::models::AbbreviationEntry;
    use crate::registry::AbbreviationRegistry;
    use std::sync::atomic::Ordering;

    const WAIT: Duration = Duration::from_secs(5);

    fn settings() -> Settings {
        Settings {
            settle_delay_ms: 0,
            ..Settings::default()
        }
    }

    fn registry(pairs: &[(&str, &str)]) -> Arc<SharedRegistry> {
        let entries: Vec<AbbreviationEntry> = pairs
            .iter()
            .map(|(t, e)| AbbreviationEntry::new(t.to_string(), e.to_string(), "text".into()))
            .collect();
        Arc::new(SharedRegistry::new(AbbreviationRegistry::from_entries(
            &entries,
        )))
    }

    fn engine_with(source: Arc<dyn KeyEventSource>, pairs: &[(&str, &str)]) -> Arc<TextExpander> {
        let expander = TextExpander::new(source, registry(pairs), &settings());
        expander.set_enabled(true).unwrap();
        expander
    }

    fn engine(source: &Arc<RecordingKeySource>) -> Arc<TextExpander> {
        engine_with(
            source.clone(),
            &[("--heart", "❤️"), ("brb", "be right back")],
        )
    }

    fn backspaces_then(count: usize, text: &str) -> Vec<SyntheticKey> {
        let mut keys = vec![SyntheticKey::Backspace; count];
        keys.push(SyntheticKey::Text(text.into()));
        keys
    }

    #[test]
    fn typing_a_trigger_and_space_expands_it() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);

        source.type_str("hi --heart ");
        assert!(expander.wait_idle(WAIT));

        assert_eq!(source.injected(), backspaces_then(8, "❤️ "));
        assert_eq!(expander.buffer_snapshot(), "");
        assert_eq!(expander.capture_state(), CaptureState::Listening);
    }

    #[test]
    fn enter_and_tab_complete_words_without_expanding() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);

        source.type_str("brb\nbrb\t");

        assert!(source.injected().is_empty());
        assert_eq!(expander.buffer_snapshot(), "brb\nbrb\t");
    }

    #[test]
    fn backspace_clears_the_whole_buffer() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);

        source.type_str("hello br");
        source.press(KeyEvent::Backspace);
        assert_eq!(expander.buffer_snapshot(), "");

        // first word of a fresh buffer is standalone
        source.type_str("brb ");
        assert!(expander.wait_idle(WAIT));
        assert_eq!(source.injected().len(), 4 + 1);
    }

    #[test]
    fn other_keys_are_ignored() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);

        source.type_str("ab");
        source.press(KeyEvent::Other);
        assert_eq!(expander.buffer_snapshot(), "ab");
    }

    #[test]
    fn injected_keys_are_not_read_back_by_the_engine() {
        let source = HookThreadKeySource::new();
        let expander = engine_with(
            source.clone(),
            &[("--heart", "❤️"), ("brb", "be right back")],
        );

        source.type_str("hi --heart ");
        assert!(expander.wait_idle(WAIT));

        assert_eq!(source.injected(), backspaces_then(8, "❤️ "));
        assert_eq!(expander.buffer_snapshot(), "");
        assert_eq!(expander.capture_state(), CaptureState::Listening);

        // The engine keeps working afterwards
        source.type_str("brb ");
        assert!(expander.wait_idle(WAIT));
        assert_eq!(source.injected().len(), 9 + 4 + 1);
        assert_eq!(expander.buffer_snapshot(), "");
    }

    #[test]
    fn expansion_ending_in_its_own_trigger_fires_once() {
        let source = HookThreadKeySource::new();
        let expander = engine_with(source.clone(), &[("ty", "thank ty")]);

        source.type_str("ty ");
        assert!(expander.wait_idle(WAIT));
        source.wait_drained();

        assert_eq!(source.injected(), backspaces_then(3, "thank ty "));
        assert_eq!(expander.buffer_snapshot(), "");
        assert_eq!(expander.capture_state(), CaptureState::Listening);
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);

        expander.set_enabled(true).unwrap();
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        assert!(expander.is_enabled());

        expander.set_enabled(false).unwrap();
        expander.set_enabled(false).unwrap();
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert!(!expander.is_enabled());
        assert!(!source.is_capturing());
    }

    #[test]
    fn disabled_engine_ignores_triggers() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);

        source.type_str("hi ");
        expander.set_enabled(false).unwrap();
        source.type_str("brb ");
        // Events that do reach the engine while disabled are dropped too
        expander.handle_key(KeyEvent::Space);

        assert!(source.injected().is_empty());
        assert_eq!(expander.buffer_snapshot(), "hi ");
    }

    #[test]
    fn failed_start_leaves_engine_disabled() {
        let source = RecordingKeySource::new();
        source.fail_start.store(true, Ordering::SeqCst);
        let expander = TextExpander::new(source.clone(), registry(&[]), &settings());

        assert!(expander.set_enabled(true).is_err());
        assert_eq!(expander.capture_state(), CaptureState::Disabled);
    }

    #[test]
    fn failed_injection_keeps_listening() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);
        source.fail_injection.store(true, Ordering::SeqCst);

        source.type_str("brb ");
        assert!(expander.wait_idle(WAIT));

        assert_eq!(expander.capture_state(), CaptureState::Listening);
        assert!(source.is_capturing());
        assert_eq!(expander.buffer_snapshot(), "");
    }

    #[test]
    fn failed_resume_disables_expansion() {
        let source = RecordingKeySource::new();
        let expander = engine(&source);
        source.fail_start.store(true, Ordering::SeqCst);

        source.type_str("brb ");
        assert!(expander.wait_idle(WAIT));

        assert_eq!(expander.capture_state(), CaptureState::Disabled);
        assert!(!source.is_capturing());
    }

    #[test]
    fn registry_swaps_are_picked_up() {
        let source = RecordingKeySource::new();
        let shared = registry(&[]);
        let expander = TextExpander::new(source.clone(), Arc::clone(&shared), &settings());
        expander.set_enabled(true).unwrap();

        source.type_str("ty ");
        assert!(source.injected().is_empty());

        let entries = vec![AbbreviationEntry::new(
            "ty".into(),
            "thank you".into(),
            "text".into(),
        )];
        shared.replace(AbbreviationRegistry::from_entries(&entries));
        source.type_str("ty ");
        assert!(expander.wait_idle(WAIT));
        assert_eq!(
            source.injected().last(),
            Some(&SyntheticKey::Text("thank you ".into()))
        );
    }
}
