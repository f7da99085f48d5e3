use std::collections::VecDeque;

/// Rolling window over the most recently typed characters.
///
/// Holds at most `capacity` characters; older ones fall off the front.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    chars: VecDeque<char>,
    capacity: usize,
    truncated: bool,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chars: VecDeque::with_capacity(capacity + 1),
            capacity,
            truncated: false,
        }
    }

    /// Append a printable character. Control characters are ignored.
    pub fn append(&mut self, c: char) {
        if c.is_control() {
            return;
        }
        self.chars.push_back(c);
        self.trim_to_capacity();
    }

    /// Append a word boundary (space, newline or tab)
    pub fn append_control(&mut self, boundary: char) {
        self.chars.push_back(boundary);
        self.trim_to_capacity();
    }

    /// Drop everything. Backspace lands here too: the buffer does not try to
    /// replay partial deletions.
    pub fn clear(&mut self) {
        self.chars.clear();
        self.truncated = false;
    }

    pub fn trim_to_capacity(&mut self) {
        while self.chars.len() > self.capacity {
            self.chars.pop_front();
            self.truncated = true;
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<char> {
        self.chars.back().copied()
    }

    /// True when characters were evicted since the last clear, meaning the
    /// first word in the buffer may be missing its head.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn snapshot(&self) -> String {
        self.chars.iter().collect()
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BUFFER_CAPACITY)
    }
}
