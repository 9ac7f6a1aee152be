//! Mailbox-source collaborator (spec §1, §6).
//!
//! Out of scope for the core: supplies canned RFC822 bodies for APPEND.
//! `MailboxSource` is the narrow interface the APPEND driver depends on;
//! [`SyntheticSource`] is the one concrete implementation this crate ships
//! so the APPEND driver and its tests have something to drive against.

use chrono::Utc;

/// One message's size/placement as returned by `get_next_size` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct SourceMessage {
    /// Physical size on disk/in the source, bytes.
    pub psize: u64,
    /// Size after CRLF normalization — what gets declared in the APPEND
    /// literal (`{vsize}`).
    pub vsize: u64,
    pub internaldate: i64,
    pub internaldate_tz: i32,
}

/// Mailbox-source interface the APPEND driver consumes (spec §6).
pub trait MailboxSource {
    /// Advance the cursor and return the next message's sizing/dating.
    fn next_size(&mut self) -> SourceMessage;

    /// The CRLF-normalized bytes for `msg`, as previously returned by
    /// `next_size` (re-reading by value rather than an `input_stream`
    /// cursor keeps the trait object-safe and ergonomic in `async` code).
    fn body(&self, msg: &SourceMessage) -> Vec<u8>;
}

/// Deterministic synthetic source: cycles through a handful of small
/// canned bodies just large enough to exercise literal/`LITERAL+`/
/// `MULTIAPPEND` handling without depending on real corpus files.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    bodies: Vec<Vec<u8>>,
    cursor: usize,
}

impl SyntheticSource {
    #[must_use]
    pub fn new() -> Self {
        let make = |n: usize| -> Vec<u8> {
            format!(
                "From: sender{n}@example.com\r\nTo: rcpt@example.com\r\nSubject: test message {n}\r\n\r\nBody line one.\r\nBody line two.\r\n"
            )
            .into_bytes()
        };
        Self {
            bodies: (0..8).map(make).collect(),
            cursor: 0,
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxSource for SyntheticSource {
    fn next_size(&mut self) -> SourceMessage {
        let body = &self.bodies[self.cursor % self.bodies.len()];
        self.cursor += 1;
        let psize = body.len() as u64;
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let internaldate = Utc::now().timestamp();
        SourceMessage {
            psize,
            vsize: psize,
            internaldate,
            internaldate_tz: 0,
        }
    }

    fn body(&self, msg: &SourceMessage) -> Vec<u8> {
        let idx = (self.cursor + self.bodies.len() - 1) % self.bodies.len();
        let body = &self.bodies[idx];
        debug_assert_eq!(body.len() as u64, msg.psize);
        body.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_cycles_bodies() {
        let mut src = SyntheticSource::new();
        let first = src.next_size();
        let body = src.body(&first);
        assert_eq!(body.len() as u64, first.psize);
        assert!(body.starts_with(b"From:"));
    }
}
