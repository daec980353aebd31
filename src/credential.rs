// Author: Lukas Bower
// Purpose: Accumulate login lines and compare them against the configured credentials.

//! Credential line matcher used by the `GetUser` and `GetPassword` login steps.

use heapless::Vec as HeaplessVec;

/// Size of the login line buffer, terminator excluded.
///
/// A line that fills the buffer without a carriage return is rejected, so the
/// longest credential that can ever match is one byte shorter.
pub const LINE_CAPACITY: usize = 16;

/// Longest username or password the matcher can accept.
pub const MAX_CREDENTIAL_LEN: usize = LINE_CAPACITY - 1;

/// Result of feeding received bytes into a [`CredentialMatcher`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No terminator seen yet.
    Pending,
    /// The completed line equals the expected credential.
    Match,
    /// The completed line differs, was empty, or overflowed the buffer.
    Mismatch,
}

/// Line accumulator for a single credential prompt.
#[derive(Debug, Default)]
pub struct CredentialMatcher {
    line: HeaplessVec<u8, LINE_CAPACITY>,
    suppress_lf: bool,
    overflowed: bool,
}

impl CredentialMatcher {
    /// Create an empty matcher.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            line: HeaplessVec::new(),
            suppress_lf: false,
            overflowed: false,
        }
    }

    /// Discard the partial line ahead of a new prompt.
    ///
    /// A pending CR keeps its claim on a following LF or NUL. The tail of an
    /// overlong line is only discarded until the next prompt; bytes typed
    /// after that start a fresh line.
    pub fn clear(&mut self) {
        self.line.clear();
        self.overflowed = false;
    }

    /// Return to the pristine state used for a fresh connection.
    pub fn reset(&mut self) {
        self.line.clear();
        self.suppress_lf = false;
        self.overflowed = false;
    }

    /// Number of bytes accumulated for the current line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.line.len()
    }

    /// Feed a received chunk and compare the line once it completes.
    ///
    /// Bytes that follow a decided line within the same chunk are discarded.
    pub fn feed(&mut self, bytes: &[u8], expected: &[u8]) -> MatchOutcome {
        let mut outcome = MatchOutcome::Pending;
        for &byte in bytes {
            if self.suppress_lf {
                self.suppress_lf = false;
                if byte == b'\n' || byte == 0 {
                    continue;
                }
            }

            if self.overflowed {
                match byte {
                    b'\r' => {
                        self.overflowed = false;
                        self.suppress_lf = true;
                    }
                    b'\n' => self.overflowed = false,
                    _ => {}
                }
                if !self.overflowed && outcome != MatchOutcome::Pending {
                    break;
                }
                continue;
            }

            if outcome != MatchOutcome::Pending {
                break;
            }

            if byte == b'\r' {
                self.suppress_lf = true;
                outcome = self.finish(expected);
                continue;
            }

            if self.line.push(byte).is_err() || self.line.is_full() {
                self.line.clear();
                self.overflowed = true;
                outcome = MatchOutcome::Mismatch;
            }
        }
        outcome
    }

    fn finish(&mut self, expected: &[u8]) -> MatchOutcome {
        let matched = !self.line.is_empty() && self.line.as_slice() == expected;
        self.line.clear();
        if matched {
            MatchOutcome::Match
        } else {
            MatchOutcome::Mismatch
        }
    }
}
