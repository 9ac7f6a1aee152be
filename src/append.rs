//! APPEND Driver (spec §4.5).
//!
//! Builds the literal-upload command text/body pairs for APPEND and
//! decides, once a literal's bytes are exhausted, whether to chain another
//! message into the same command (`MULTIAPPEND`) or close it out. Actual
//! socket writes happen in the driving task; this module only produces the
//! bytes and flips the client's upload-progress bookkeeping.

use crate::capabilities::Capabilities;
use crate::catalog::{info, State};
use crate::client::Client;
use crate::source::MailboxSource;

/// One slice of an APPEND command ready to be written to the wire: a text
/// prefix (either the opening `APPEND ...{n}` line or, when chaining, a
/// bare ` (flags) "date" {n}` continuation) plus the CRLF-normalized body.
#[derive(Debug, Clone)]
pub struct AppendSlice {
    pub prefix: String,
    pub body: Vec<u8>,
    /// Awaiting an untagged `+` continuation before `body` may be sent.
    pub needs_continuation: bool,
}

fn format_internaldate(epoch_secs: i64, tz_offset_mins: i32) -> String {
    use chrono::{TimeZone, Utc};
    let dt = Utc
        .timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let sign = if tz_offset_mins >= 0 { '+' } else { '-' };
    let abs = tz_offset_mins.unsigned_abs();
    format!(
        "{} {}{:02}{:02}",
        dt.format("%d-%b-%Y %H:%M:%S"),
        sign,
        abs / 60,
        abs % 60
    )
}

impl Client {
    /// Start (or, when `chaining`, continue) an APPEND literal upload.
    pub fn build_append_slice(&mut self, source: &mut dyn MailboxSource, chaining: bool) -> AppendSlice {
        let msg = source.next_size();
        let body = source.body(&msg);
        let literal_plus = self.capabilities.contains(Capabilities::LITERAL_PLUS);
        self.append_literal_plus = literal_plus;
        let plus = if literal_plus { "+" } else { "" };
        let datetime = format_internaldate(msg.internaldate, msg.internaldate_tz);

        let prefix = if chaining {
            format!(" (\\Seen) \"{datetime}\" {{{}{plus}}}\r\n", msg.vsize)
        } else {
            format!(
                "APPEND \"{}\" (\\Seen) \"{datetime}\" {{{}{plus}}}\r\n",
                self.append_dest_mailbox, msg.vsize
            )
        };

        self.append_vsize_remaining = msg.vsize;
        self.append_unfinished = true;
        self.append_mid_upload = !literal_plus;

        AppendSlice {
            prefix,
            body,
            needs_continuation: !literal_plus,
        }
    }

    /// Call once a literal's bytes have been fully written. Returns `true`
    /// if another slice should be chained into the same command
    /// (MULTIAPPEND), `false` if the command should be closed with a
    /// trailing `\r\n`.
    #[must_use]
    pub fn append_should_chain(&self) -> bool {
        if !self.capabilities.contains(Capabilities::MULTIAPPEND) {
            return false;
        }
        let again = info(State::Append).probability_again;
        self.plan.front() == Some(&State::Append) && again > 0
    }

    /// Mark the literal as fully written; call before deciding whether to
    /// chain or close.
    pub fn append_slice_written(&mut self) {
        self.append_vsize_remaining = 0;
        self.append_mid_upload = false;
    }

    /// Close out the APPEND command once no more slices are chained.
    pub fn append_finish(&mut self) {
        self.append_unfinished = false;
        self.append_mid_upload = false;
    }
}
