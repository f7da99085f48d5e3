mod common;

use common::{backspaces_then, keyed_store, open_app, ScriptedKeySource, SETTLE};
use std::sync::Arc;
use tempfile::TempDir;
use tex_expander::{CaptureState, MemorySecretStore, SyntheticKey};

#[test]
fn heart_trigger_after_a_word_expands() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(dir.path(), keyed_store());
    let source = ScriptedKeySource::new();
    let engine = app.attach_engine(source.clone());
    app.add_or_update("--heart", "❤️", "emoji").unwrap();
    app.set_expansion_enabled(true).unwrap();

    source.type_str("hi --heart ");
    assert!(engine.wait_idle(SETTLE));

    assert_eq!(source.injected(), backspaces_then(8, "❤️ "));
    assert_eq!(engine.buffer_snapshot(), "");
    assert_eq!(engine.capture_state(), CaptureState::Listening);
}

#[test]
fn triggers_inside_words_do_not_fire() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(dir.path(), keyed_store());
    let source = ScriptedKeySource::new();
    let engine = app.attach_engine(source.clone());
    app.add_or_update("brb", "be right back", "text").unwrap();
    app.set_expansion_enabled(true).unwrap();

    source.type_str("xbrb brbx ");
    assert!(source.injected().is_empty());

    source.type_str("brb ");
    assert!(engine.wait_idle(SETTLE));
    assert_eq!(source.injected(), backspaces_then(4, "be right back "));
}

#[test]
fn ignored_and_locked_entries_never_expand() {
    let dir = TempDir::new().unwrap();
    let secrets = keyed_store();
    {
        let mut setup = open_app(dir.path(), secrets);
        setup.add_or_update("pw", "hunter2", "passwords").unwrap();
        setup.add_or_update("omw", "on my way", "text").unwrap();
        setup.toggle_ignored("omw").unwrap();
    }

    let mut app = open_app(dir.path(), Arc::new(MemorySecretStore::unavailable()));
    let source = ScriptedKeySource::new();
    app.attach_engine(source.clone());
    app.set_expansion_enabled(true).unwrap();

    source.type_str("pw omw ");
    assert!(source.injected().is_empty());
}

#[test]
fn disabled_expansion_leaves_buffer_untouched() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(dir.path(), keyed_store());
    let source = ScriptedKeySource::new();
    let engine = app.attach_engine(source.clone());
    app.add_or_update("brb", "be right back", "text").unwrap();

    app.set_expansion_enabled(true).unwrap();
    source.type_str("ok ");
    app.set_expansion_enabled(false).unwrap();
    source.type_str("brb ");

    assert!(source.injected().is_empty());
    assert_eq!(app.current_buffer_snapshot().as_deref(), Some("ok "));
    assert!(!engine.is_enabled());

    // Repeated toggles are harmless
    app.set_expansion_enabled(false).unwrap();
    app.set_expansion_enabled(true).unwrap();
    app.set_expansion_enabled(true).unwrap();
    source.type_str("brb ");
    assert!(engine.wait_idle(SETTLE));
    assert_eq!(
        source.injected().last(),
        Some(&SyntheticKey::Text("be right back ".into()))
    );
}

#[test]
fn edits_take_effect_without_restart() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(dir.path(), keyed_store());
    let source = ScriptedKeySource::new();
    let engine = app.attach_engine(source.clone());
    app.set_expansion_enabled(true).unwrap();

    app.add_or_update("sig", "Regards", "text").unwrap();
    source.type_str("sig ");
    assert!(engine.wait_idle(SETTLE));
    app.add_or_update("sig", "Best regards", "text").unwrap();
    source.type_str("sig ");
    assert!(engine.wait_idle(SETTLE));
    app.delete("sig").unwrap();
    source.type_str("sig ");

    let texts: Vec<_> = source
        .injected()
        .into_iter()
        .filter_map(|key| match key {
            SyntheticKey::Text(text) => Some(text),
            SyntheticKey::Backspace => None,
        })
        .collect();
    assert_eq!(texts, vec!["Regards ", "Best regards "]);
}

#[test]
fn buffer_stays_bounded() {
    let dir = TempDir::new().unwrap();
    let mut app = open_app(dir.path(), keyed_store());
    let source = ScriptedKeySource::new();
    let engine = app.attach_engine(source.clone());
    app.set_expansion_enabled(true).unwrap();

    source.type_str(&"abcdefghij".repeat(10));

    let snapshot = engine.buffer_snapshot();
    assert_eq!(snapshot.chars().count(), 50);
    assert!(snapshot.ends_with("abcdefghij"));
}
