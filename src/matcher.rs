use crate::buffer::InputBuffer;
use crate::registry::AbbreviationRegistry;

/// A trigger found at the end of the buffer together with its expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub trigger: String,
    pub expansion: String,
}

impl TriggerMatch {
    /// Characters to erase: the trigger plus the space that completed it
    pub fn erase_count(&self) -> usize {
        self.trigger.chars().count() + 1
    }
}

/// Check whether the word just completed by a space is a trigger.
///
/// Only the last word counts, and only when it sits directly before the
/// trailing space. A word glued to other text (`foo--heart`) is a different
/// word and does not fire.
pub fn check(buffer: &InputBuffer, registry: &AbbreviationRegistry) -> Option<TriggerMatch> {
    if registry.is_empty() || buffer.last() != Some(' ') {
        return None;
    }

    let text = buffer.snapshot();
    let text = &text[..text.len() - ' '.len_utf8()];
    if text.is_empty() || text.ends_with(char::is_whitespace) {
        return None;
    }

    let word = text.split_whitespace().last()?;

    // The head of a word that starts at the front of a truncated buffer was
    // evicted, so what remains is only a suffix of what was typed.
    if word.len() == text.len() && buffer.is_truncated() {
        return None;
    }

    registry.lookup(word).map(|expansion| TriggerMatch {
        trigger: word.to_string(),
        expansion: expansion.to_string(),
    })
}
