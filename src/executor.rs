use crate::error::Result;
use crate::keyboard::{KeyEventSource, SyntheticKey};
use crate::matcher::TriggerMatch;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Whether key events are reaching the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Expansion is switched off by the user
    Disabled,
    /// Capture is on and events flow into the buffer
    Listening,
    /// Capture is paused while an expansion types its output
    Suspended,
}

/// The keys that replace a typed trigger: one backspace per trigger
/// character plus one for the completing space, then the expansion and a
/// fresh space.
pub fn replacement_keys(found: &TriggerMatch) -> Vec<SyntheticKey> {
    let mut keys = vec![SyntheticKey::Backspace; found.erase_count()];
    keys.push(SyntheticKey::Text(format!("{} ", found.expansion)));
    keys
}

/// Performs the destructive replacement of a trigger with its expansion.
///
/// An expansion is three steps: `suspend` closes the capture gate on the
/// listener thread, `replace` injects on a different thread so the hook
/// keeps draining (and dropping) its own output, and `resume` reopens the
/// gate once the injected keys have passed.
pub struct ExpansionExecutor {
    source: Arc<dyn KeyEventSource>,
    settle_delay: Duration,
}

impl ExpansionExecutor {
    pub fn new(source: Arc<dyn KeyEventSource>, settle_delay: Duration) -> Self {
        Self {
            source,
            settle_delay,
        }
    }

    /// Close the capture gate ahead of an expansion
    pub fn suspend(&self, capture: &mut CaptureState) -> Result<()> {
        self.source.stop_capture()?;
        *capture = CaptureState::Suspended;
        Ok(())
    }

    /// Erase the trigger and type the expansion, then block until the
    /// injected keys have gone through the hook.
    ///
    /// Must not run on the thread that delivers key events.
    pub fn replace(&self, found: &TriggerMatch) -> Result<()> {
        debug!(
            trigger = %found.trigger,
            erase = found.erase_count(),
            "Replacing trigger"
        );
        let injected = self.source.inject_keys(&replacement_keys(found));

        // A partial injection still has keys in flight
        self.source.drain_injected(self.settle_delay);

        if let Err(ref e) = injected {
            warn!(trigger = %found.trigger, error = %e, "Expansion injection failed");
        }
        injected
    }

    /// Reopen capture after an expansion. Capture switched off in the
    /// meantime stays off; a failed restart leaves expansion `Disabled`.
    pub fn resume(&self, capture: &mut CaptureState) -> Result<()> {
        if *capture != CaptureState::Suspended {
            return Ok(());
        }

        match self.source.start_capture() {
            Ok(()) => {
                *capture = CaptureState::Listening;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Could not resume keyboard capture, expansion disabled");
                *capture = CaptureState::Disabled;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::testing::RecordingKeySource;
    use std::sync::atomic::Ordering;

    fn heart() -> TriggerMatch {
        TriggerMatch {
            trigger: "--heart".into(),
            expansion: "❤️".into(),
        }
    }

    fn listening(source: &RecordingKeySource) -> CaptureState {
        source.start_capture().unwrap();
        CaptureState::Listening
    }

    #[test]
    fn emits_backspaces_then_expansion_and_space() {
        let source = RecordingKeySource::new();
        let executor = ExpansionExecutor::new(source.clone(), Duration::ZERO);

        executor.replace(&heart()).unwrap();

        let mut expected = vec![SyntheticKey::Backspace; 8];
        expected.push(SyntheticKey::Text("❤️ ".into()));
        assert_eq!(source.injected(), expected);
        assert_eq!(source.drains.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspend_then_resume_toggles_the_gate() {
        let source = RecordingKeySource::new();
        let executor = ExpansionExecutor::new(source.clone(), Duration::ZERO);
        let mut capture = listening(&source);

        executor.suspend(&mut capture).unwrap();
        assert_eq!(capture, CaptureState::Suspended);
        assert!(!source.is_capturing());

        executor.resume(&mut capture).unwrap();
        assert_eq!(capture, CaptureState::Listening);
        assert!(source.is_capturing());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert_eq!(source.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_injection_still_drains() {
        let source = RecordingKeySource::new();
        source.fail_injection.store(true, Ordering::SeqCst);
        let executor = ExpansionExecutor::new(source.clone(), Duration::ZERO);

        assert!(executor.replace(&heart()).is_err());
        assert_eq!(source.drains.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_resume_leaves_expansion_disabled() {
        let source = RecordingKeySource::new();
        let executor = ExpansionExecutor::new(source.clone(), Duration::ZERO);
        let mut capture = listening(&source);
        executor.suspend(&mut capture).unwrap();
        source.fail_start.store(true, Ordering::SeqCst);

        assert!(executor.resume(&mut capture).is_err());
        assert_eq!(capture, CaptureState::Disabled);
        assert!(!source.is_capturing());
    }

    #[test]
    fn does_not_resume_capture_switched_off_meanwhile() {
        let source = RecordingKeySource::new();
        let executor = ExpansionExecutor::new(source.clone(), Duration::ZERO);
        let mut capture = CaptureState::Disabled;

        executor.resume(&mut capture).unwrap();

        assert_eq!(capture, CaptureState::Disabled);
        assert_eq!(source.starts.load(Ordering::SeqCst), 0);
        assert!(!source.is_capturing());
    }

    #[test]
    fn erase_count_counts_characters_not_bytes() {
        let found = TriggerMatch {
            trigger: "ñé".into(),
            expansion: "x".into(),
        };
        let keys = replacement_keys(&found);
        assert_eq!(
            keys.iter().filter(|k| **k == SyntheticKey::Backspace).count(),
            3
        );
    }
}
