//! Serial monitor text buffering.
//!
//! Outside an upload the serial line carries whatever the sketch prints.
//! Bytes arrive in arbitrary chunks that can split a UTF-8 sequence in the
//! middle; [`MonitorBuffer`] reassembles them into displayable text, keeps
//! at most a bounded window of it, and hands out complete lines.

/// Default retained-text cap in bytes of UTF-8.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded accumulator for raw serial output.
///
/// Appended bytes are decoded incrementally: invalid sequences become the
/// replacement character, and an incomplete trailing sequence is held back
/// until the bytes that finish it arrive. When the retained text exceeds
/// the cap, the oldest text is dropped from the front.
#[derive(Debug)]
pub struct MonitorBuffer {
    text: String,
    carry: Vec<u8>,
    capacity: usize,
}

impl Default for MonitorBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MonitorBuffer {
    /// Create a buffer with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer retaining at most `capacity` bytes of text.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::new(),
            carry: Vec::new(),
            capacity,
        }
    }

    /// Append raw serial bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);
        let decoded = drain_utf8_lossy(&mut self.carry);
        self.text.push_str(&decoded);
        self.trim_front();
    }

    /// The retained text window.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.text
    }

    /// Bytes of retained text.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether no text is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Remove and return every complete line, leaving a trailing partial
    /// line (if any) in the buffer.
    pub fn drain_lines(&mut self) -> Vec<String> {
        match self.text.rfind('\n') {
            Some(pos) => {
                let head: String = self.text.drain(..=pos).collect();
                head.lines().map(str::to_string).collect()
            }
            None => Vec::new(),
        }
    }

    /// Discard all retained text and any undecoded carry bytes.
    pub fn clear(&mut self) {
        self.text.clear();
        self.carry.clear();
    }

    /// Drop text from the front until the cap is respected, never cutting
    /// through a multi-byte character.
    fn trim_front(&mut self) {
        if self.text.len() <= self.capacity {
            return;
        }
        let mut cut = self.text.len() - self.capacity;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
    }
}

/// Decode as much of `buffer` as possible into text.
///
/// Invalid sequences emit the replacement character and decoding
/// continues; an incomplete trailing sequence stays in `buffer` for the
/// next call.
fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                    output.push_str(valid);
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push(char::REPLACEMENT_CHARACTER);
                        let drain_to = valid_up_to
                            .saturating_add(invalid_len)
                            .min(buffer.len());
                        buffer.drain(..drain_to);
                    }
                    // The tail might become valid once more bytes arrive.
                    None => {
                        buffer.drain(..valid_up_to);
                        break;
                    }
                }
            }
        }
    }

    output
}
