//! Server-side line editing for character-mode Telnet clients.
//!
//! The client sends every keystroke; [`LineBuffer`] assembles them into
//! lines, produces the echo bytes the client should see, and exposes the
//! unsent contents so broadcasts can redraw them.

/// Control characters handled by the line editor.
pub mod control {
    /// NUL - Null character
    pub const NUL: u8 = 0x00;

    /// ETX - End of Text (Ctrl+C)
    pub const ETX: u8 = 0x03;

    /// EOT - End of Transmission (Ctrl+D)
    pub const EOT: u8 = 0x04;

    /// BEL - Bell
    pub const BEL: u8 = 0x07;

    /// BS - Backspace
    pub const BS: u8 = 0x08;

    /// LF - Line Feed
    pub const LF: u8 = 0x0A;

    /// CR - Carriage Return
    pub const CR: u8 = 0x0D;

    /// DEL - Delete (also used as backspace)
    pub const DEL: u8 = 0x7F;
}

/// Result of processing one input byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResult {
    /// A complete line was entered.
    Line(String),
    /// Input is still being buffered.
    Buffering,
    /// User pressed Ctrl+C; the line was discarded.
    Cancel,
    /// User pressed Ctrl+D on an empty line.
    Eof,
}

/// A line buffer for input processing.
#[derive(Debug)]
pub struct LineBuffer {
    /// The current buffer contents.
    buffer: Vec<u8>,
    /// Maximum buffer size.
    max_size: usize,
    /// Whether the previous byte was CR, so a following LF or NUL is swallowed.
    after_cr: bool,
}

impl LineBuffer {
    /// Create a new line buffer with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_size.min(1024)),
            max_size,
            after_cr: false,
        }
    }

    /// Get the current buffer contents.
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Process a single byte of input.
    ///
    /// Returns the input result and the bytes to echo back.
    pub fn process_byte(&mut self, byte: u8) -> (InputResult, Vec<u8>) {
        let after_cr = std::mem::replace(&mut self.after_cr, byte == control::CR);

        match byte {
            control::LF | control::NUL if after_cr => (InputResult::Buffering, vec![]),
            control::CR | control::LF => {
                let line = self.take_line();
                (InputResult::Line(line), vec![control::CR, control::LF])
            }
            control::BS | control::DEL => {
                if self.erase_char() {
                    (InputResult::Buffering, vec![control::BS, b' ', control::BS])
                } else {
                    (InputResult::Buffering, vec![])
                }
            }
            control::ETX => {
                self.clear();
                (InputResult::Cancel, b"^C\r\n".to_vec())
            }
            control::EOT if self.buffer.is_empty() => (InputResult::Eof, vec![]),
            _ if byte < 0x20 => (InputResult::Buffering, vec![]),
            _ if self.buffer.len() >= self.max_size => {
                (InputResult::Buffering, vec![control::BEL])
            }
            _ => {
                self.buffer.push(byte);
                (InputResult::Buffering, vec![byte])
            }
        }
    }

    /// Remove the last character, including all bytes of a UTF-8 sequence.
    fn erase_char(&mut self) -> bool {
        let Some(mut byte) = self.buffer.pop() else {
            return false;
        };
        // Continuation bytes are 0b10xx_xxxx; keep popping until the lead byte.
        while byte & 0xC0 == 0x80 {
            match self.buffer.pop() {
                Some(prev) => byte = prev,
                None => break,
            }
        }
        true
    }

    /// Take the current buffer contents as a string and clear the buffer.
    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}
