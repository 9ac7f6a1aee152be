//! Reply Router (spec §4.6) and command-text issuing.
//!
//! `Client::issue_state` turns a planner-selected [`State`] into wire bytes
//! and registers the expected reply with the command queue; `handle_untagged`
//! and `handle_tagged` do the reverse, folding server responses back into
//! the view/storage model. STORE Verification lives here too since it only
//! runs from the STORE/STORE_DEL tagged-reply path.

use base64::Engine as _;
use tracing::{debug, warn};

use crate::capabilities::Capabilities;
use crate::catalog::{LoginState, State};
use crate::client::Client;
use crate::mailbox::storage::MAIL_FLAG_DELETED_IDX;
use crate::mailbox::view::MailFlags;
use crate::queue::{Callback, QueuedCommand, StoreOp};
use crate::wire::arg::ImapArg;
use crate::wire::parser::{ResponseLine, Status, Tag};
use crate::mailbox::SeqRange;

/// Server-specific wording the router accepts without logging a failure,
/// since it is known to mean "the message you addressed is already gone"
/// rather than an actual protocol violation (spec §4.6).
const KNOWN_EXPUNGED_QUIRKS: &[&str] = &[
    "no longer exist",
    "No matching messages",
    "have been expunged",
    "Cannot store on expunged messages",
    "STORE completed",
    "STORE failed",
    "have been deleted",
    "Document has been deleted",
];

/// What the driving loop (world/client task) should do after a reply was
/// processed. Keeps storage-registry-level concerns (spawning clients,
/// issuing a follow-up command) out of `Client`'s own method signatures.
#[derive(Debug, Default)]
pub struct ReplyEffect {
    /// Wire bytes for a follow-up command the router itself queued
    /// (CREATE-on-TRYCREATE, CREATE-on-NO, re-issued COPY, ...).
    pub follow_up: Option<String>,
    /// First successful auth: the caller may spawn more simulated clients.
    pub spawn_more_clients: bool,
    /// A model-invariant violation was detected; increments the run's
    /// failure counter.
    pub failure: Option<String>,
    /// BAD reply or other unrecoverable condition: disconnect this client.
    pub fatal: bool,
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn sasl_plain(user: &str, pass: &str) -> String {
    let mut raw = Vec::with_capacity(user.len() * 2 + pass.len() + 2);
    raw.push(0);
    raw.extend_from_slice(user.as_bytes());
    raw.push(0);
    raw.extend_from_slice(pass.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Extract the first `[CODE ...]` bracketed resp-text code, if any. The
/// tokenizer leaves brackets attached to their atoms (`[TRYCREATE]`,
/// `[HIGHESTMODSEQ`, `123]`), so a multi-token code has to be reassembled.
fn extract_bracket_code(args: &[ImapArg]) -> Option<(String, Vec<String>)> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let ImapArg::Atom(s) = arg else { continue };
        let Some(rest) = s.strip_prefix('[') else { continue };
        let mut tokens = Vec::new();
        let mut closed = false;
        let mut push = |tok: &str, tokens: &mut Vec<String>, closed: &mut bool| {
            let mut t = tok.to_string();
            if let Some(stripped) = t.strip_suffix(']') {
                t = stripped.to_string();
                *closed = true;
            }
            if !t.is_empty() {
                tokens.push(t);
            }
        };
        push(rest, &mut tokens, &mut closed);
        while !closed {
            match iter.next() {
                Some(ImapArg::Atom(tok)) => push(tok, &mut tokens, &mut closed),
                Some(ImapArg::List(items)) => {
                    for item in items {
                        if let Some(tok) = item.as_str() {
                            tokens.push(tok.to_string());
                        }
                    }
                }
                _ => break,
            }
        }
        if tokens.is_empty() {
            return None;
        }
        let code = tokens.remove(0).to_ascii_uppercase();
        return Some((code, tokens));
    }
    None
}

fn response_contains_quirk(args: &[ImapArg]) -> bool {
    let text = crate::wire::arg::imap_args_to_str(args);
    KNOWN_EXPUNGED_QUIRKS.iter().any(|q| text.contains(q))
}

impl Client {
    /// Build wire bytes for `state` and register the expected reply.
    /// Returns `None` for pseudo-states that emit no command, or when a
    /// MSGSET state has nothing to address (empty view).
    pub fn issue_state(&mut self, state: State) -> Option<String> {
        let range = self.view.as_ref().filter(|v| !v.is_empty()).map(|v| SeqRange {
            seq1: 1,
            seq2: v.len() as u32,
        });

        let (text, seq_range, callback): (String, Option<SeqRange>, Callback) = match state {
            State::Authenticate => (
                format!(
                    "AUTHENTICATE PLAIN {}",
                    sasl_plain(&self.credential.username, &self.credential.password)
                ),
                None,
                Callback::StateDefault,
            ),
            State::Login => (
                format!(
                    "LOGIN {} {}",
                    quote(&self.credential.username),
                    quote(&self.credential.password)
                ),
                None,
                Callback::StateDefault,
            ),
            State::List => ("LIST \"\" \"*\"".to_string(), None, Callback::StateDefault),
            State::MCreate => (
                format!("CREATE \"stress-{}\"", self.idx),
                None,
                Callback::StateDefault,
            ),
            State::MDelete => (
                format!("DELETE \"stress-{}\"", self.idx),
                None,
                Callback::StateDefault,
            ),
            State::Status => (
                format!(
                    "STATUS {} (MESSAGES UIDNEXT UIDVALIDITY)",
                    quote(&self.config.mailbox)
                ),
                None,
                Callback::StateDefault,
            ),
            State::Select => (format!("SELECT {}", quote(&self.config.mailbox)), None, Callback::StateDefault),
            State::Fetch => {
                let range = range?;
                (
                    format!("FETCH {}:{} (FLAGS)", range.seq1, range.seq2),
                    Some(range),
                    Callback::StateDefault,
                )
            }
            State::Fetch2 => {
                let range = range?;
                (
                    format!(
                        "FETCH {}:{} (FLAGS INTERNALDATE RFC822.SIZE)",
                        range.seq1, range.seq2
                    ),
                    Some(range),
                    Callback::StateDefault,
                )
            }
            State::Search => {
                self.search_pending = true;
                (crate::query::build_search(), None, Callback::StateDefault)
            }
            State::Sort => (crate::query::build_sort(), None, Callback::StateDefault),
            State::Thread => (crate::query::build_thread(), None, Callback::StateDefault),
            State::Copy => {
                let range = range?;
                (
                    format!("COPY {}:{} {}", range.seq1, range.seq2, quote(&self.config.copy_dest)),
                    Some(range),
                    Callback::Copy {
                        dest: self.config.copy_dest.clone(),
                    },
                )
            }
            State::Store => {
                let range = range?;
                let flags_text = "\\Flagged".to_string();
                self.view
                    .as_mut()
                    .unwrap()
                    .seq_range_flags_ref(range, 1, true);
                (
                    format!("STORE {}:{} +FLAGS ({flags_text})", range.seq1, range.seq2),
                    Some(range),
                    Callback::Store {
                        op: StoreOp::Add,
                        flags_text,
                        silent: false,
                    },
                )
            }
            State::StoreDel => {
                let range = range?;
                let flags_text = "\\Flagged".to_string();
                self.view
                    .as_mut()
                    .unwrap()
                    .seq_range_flags_ref(range, 1, true);
                (
                    format!(
                        "STORE {}:{} -FLAGS.SILENT ({flags_text})",
                        range.seq1, range.seq2
                    ),
                    Some(range),
                    Callback::Store {
                        op: StoreOp::Remove,
                        flags_text,
                        silent: true,
                    },
                )
            }
            State::Delete => {
                let range = range?;
                let flags_text = "\\Deleted".to_string();
                self.view
                    .as_mut()
                    .unwrap()
                    .seq_range_flags_ref(range, 1, true);
                (
                    format!(
                        "STORE {}:{} +FLAGS.SILENT ({flags_text})",
                        range.seq1, range.seq2
                    ),
                    Some(range),
                    Callback::Store {
                        op: StoreOp::Add,
                        flags_text,
                        silent: true,
                    },
                )
            }
            State::Expunge => ("EXPUNGE".to_string(), None, Callback::StateDefault),
            State::Noop => ("NOOP".to_string(), None, Callback::StateDefault),
            State::Idle => {
                self.idling = true;
                ("IDLE".to_string(), None, Callback::StateDefault)
            }
            State::Check => ("CHECK".to_string(), None, Callback::StateDefault),
            State::Logout => ("LOGOUT".to_string(), None, Callback::StateDefault),
            State::Banner
            | State::Append
            | State::Disconnect
            | State::Delay
            | State::Checkpoint
            | State::Lmtp => return None,
        };

        let (_, wire) = self.queue.send(&text, state, seq_range, callback);
        Some(wire)
    }

    fn apply_resp_text_code(&mut self, code: &str, params: &[String]) {
        match code {
            "READ-WRITE" => {
                if let Some(view) = self.view.as_mut() {
                    view.readwrite = true;
                }
            }
            "HIGHESTMODSEQ" => {
                if let (Some(view), Some(n)) = (self.view.as_mut(), params.first().and_then(|p| p.parse().ok())) {
                    self.highest_untagged_modseq = None;
                    view.highest_modseq = n;
                }
            }
            "CAPABILITY" => {
                self.capabilities = Capabilities::parse(&params.join(" "));
            }
            "CLOSED" => {
                if self.login_state == LoginState::Selected {
                    self.login_state = LoginState::Auth;
                    self.view = None;
                }
            }
            "PERMANENTFLAGS" => {
                if let Some(view) = self.view.as_ref() {
                    for name in params.iter().filter(|p| !p.starts_with('\\') && *p != "*") {
                        view.storage.borrow_mut().keyword_names.get_or_register(name);
                    }
                }
            }
            "UIDNEXT" => {
                if let (Some(view), Some(n)) = (self.view.as_mut(), params.first().and_then(|p| p.parse().ok())) {
                    if view.select_uidnext.is_none() {
                        view.select_uidnext = Some(n);
                    }
                }
            }
            "UIDVALIDITY" => {
                if let (Some(view), Some(n)) = (
                    self.view.as_ref(),
                    params.first().and_then(|p| p.parse::<u32>().ok()),
                ) {
                    let mut storage = view.storage.borrow_mut();
                    if storage.uidvalidity != 0 && storage.uidvalidity != n && !self.config.no_tracking {
                        warn!(old = storage.uidvalidity, new = n, "UIDVALIDITY changed");
                    }
                    storage.uidvalidity = n;
                }
            }
            _ => {}
        }
    }

    /// Process one untagged response line, folding it into the view.
    pub fn handle_untagged(&mut self, line: &ResponseLine) {
        if line.status == Some(Status::Bye) {
            self.seen_bye = true;
            return;
        }
        if let Some((code, params)) = extract_bracket_code(&line.args) {
            self.apply_resp_text_code(&code, &params);
        }

        let Some(view) = self.view.as_mut() else { return };
        let Some(n) = line.args.first().and_then(ImapArg::as_str).and_then(|s| s.parse::<u32>().ok()) else {
            return;
        };
        let Some(kind) = line.args.get(1).and_then(ImapArg::as_str) else {
            return;
        };
        match kind.to_ascii_uppercase().as_str() {
            "EXISTS" => view.grow_exists(n, &mut self.next_uid_hint),
            "RECENT" => view.recent_count = n,
            "EXPUNGE" => view.expunge(n),
            "FETCH" => {
                if let Some(ImapArg::List(items)) = line.args.get(2) {
                    apply_fetch_list(view, n, items);
                }
            }
            _ => {}
        }
    }

    /// Process one tagged reply against the queued command it completes.
    pub fn handle_tagged(&mut self, line: &ResponseLine) -> ReplyEffect {
        let Tag::Tagged(tag) = &line.tag else {
            return ReplyEffect::default();
        };
        let Some(cmd) = self.queue.take(tag) else {
            return ReplyEffect::default();
        };

        if line.status == Some(Status::Bad) {
            warn!(state = ?cmd.state, "BAD reply, failing connection");
            return ReplyEffect { fatal: true, ..ReplyEffect::default() };
        }

        let ok = line.status == Some(Status::Ok);
        match cmd.state {
            State::Authenticate | State::Login if ok => {
                self.login_state = LoginState::Auth;
                ReplyEffect { spawn_more_clients: true, ..ReplyEffect::default() }
            }
            State::Select if ok => {
                self.login_state = LoginState::Selected;
                ReplyEffect::default()
            }
            State::Select | State::Status if !ok && self.try_create_mailbox => {
                ReplyEffect {
                    follow_up: Some(format!("CREATE {}\r\n", quote(&self.config.mailbox))),
                    ..ReplyEffect::default()
                }
            }
            State::Fetch | State::Fetch2 if ok => {
                if let (Some(view), Some(range)) = (self.view.as_mut(), cmd.seq_range) {
                    view.seq_range_flags_ref(range, -1, true);
                }
                ReplyEffect::default()
            }
            State::Store | State::StoreDel if ok => self.finish_store(&cmd),
            State::Copy if !ok => {
                if let Some((code, _)) = extract_bracket_code(&line.args) {
                    if code == "TRYCREATE" {
                        return ReplyEffect {
                            follow_up: Some(format!("CREATE {}\r\n", quote(&self.config.copy_dest))),
                            ..ReplyEffect::default()
                        };
                    }
                }
                ReplyEffect::default()
            }
            State::Append if !ok && self.try_create_mailbox => ReplyEffect {
                follow_up: Some(format!("CREATE {}\r\n", quote(&self.append_dest_mailbox))),
                ..ReplyEffect::default()
            },
            State::Logout => {
                if self.login_state != LoginState::NonAuth && !self.seen_bye {
                    warn!("LOGOUT completed without a preceding BYE");
                }
                self.login_state = LoginState::NonAuth;
                ReplyEffect::default()
            }
            State::Idle if ok => {
                self.idling = false;
                self.idle_done_sent = false;
                ReplyEffect::default()
            }
            _ if !ok && response_contains_quirk(&line.args) => {
                debug!(state = ?cmd.state, "known server quirk, not a failure");
                ReplyEffect::default()
            }
            _ => ReplyEffect::default(),
        }
    }

    /// STORE Verification (spec §4.6): confirm the server actually applied
    /// the change it acknowledged, for every message the STORE addressed.
    fn finish_store(&mut self, cmd: &QueuedCommand) -> ReplyEffect {
        let Callback::Store { op, flags_text, silent } = &cmd.callback else {
            return ReplyEffect::default();
        };
        let mut failure = None;

        if self.config.assign_flag_owners {
            if let (Some(view), Some(range)) = (self.view.as_ref(), cmd.seq_range) {
                let mask = parse_flag_mask(flags_text);
                if let Some(flag) = single_flag(mask) {
                    if let Some(idx) = flag_owner_index(flag) {
                        let owns = view.storage.borrow_mut().claim_flag_owner(idx, self.idx as u32 + 1);
                        if !owns {
                            failure = Some(format!("flag owner conflict on {flags_text}"));
                        }
                    }
                }
                if !*silent {
                    for seq in range.seq1..=range.seq2 {
                        if let Some(meta) = view.metadata_at_seq(seq) {
                            if meta.dirty == crate::mailbox::FlagchangeDirty::Yes {
                                failure = Some(format!("STORE didn't return FETCH FLAGS for seq {seq}"));
                                continue;
                            }
                            if !meta.mail_flags_set() {
                                continue;
                            }
                            let current = meta.mail_flags.unwrap_or(MailFlags::empty());
                            let test = current & mask;
                            let matches = match op {
                                StoreOp::Add => test == mask,
                                StoreOp::Remove => test.is_empty(),
                                StoreOp::Replace => test == mask && current == mask,
                            };
                            if !matches {
                                failure = Some(format!("STORE didn't update flags for seq {seq}"));
                            }
                        }
                    }
                }
            }
        }

        if let (Some(view), Some(range)) = (self.view.as_mut(), cmd.seq_range) {
            view.seq_range_flags_ref(range, -1, true);
            if *silent {
                view.seq_range_flags_ref(range, -1, true);
            }
        }

        ReplyEffect { failure, ..ReplyEffect::default() }
    }
}

fn parse_flag_mask(flags_text: &str) -> MailFlags {
    flags_text
        .split_whitespace()
        .fold(MailFlags::empty(), |acc, tok| acc | MailFlags::parse_one(tok))
}

fn single_flag(mask: MailFlags) -> Option<MailFlags> {
    if mask.bits().count_ones() == 1 {
        Some(mask)
    } else {
        None
    }
}

fn flag_owner_index(flag: MailFlags) -> Option<usize> {
    match flag {
        MailFlags::SEEN => Some(0),
        MailFlags::ANSWERED => Some(1),
        MailFlags::DELETED => Some(MAIL_FLAG_DELETED_IDX),
        MailFlags::FLAGGED => Some(3),
        MailFlags::DRAFT => Some(4),
        _ => None,
    }
}

fn apply_fetch_list(view: &mut crate::mailbox::MailboxView, seq: u32, items: &[ImapArg]) {
    let mut i = 0;
    while i + 1 < items.len() {
        if let ImapArg::Atom(name) = &items[i] {
            if name.eq_ignore_ascii_case("FLAGS") {
                if let ImapArg::List(flag_items) = &items[i + 1] {
                    let mut flags = MailFlags::empty();
                    let mut keyword_names = Vec::new();
                    for f in flag_items {
                        if let Some(tok) = f.as_str() {
                            if tok.starts_with('\\') {
                                flags |= MailFlags::parse_one(tok);
                            } else {
                                keyword_names.push(tok.to_string());
                            }
                        }
                    }
                    let mut view_idxs = Vec::new();
                    for name in &keyword_names {
                        let name_idx = view.storage.borrow_mut().keyword_names.get_or_register(name);
                        let view_idx = view.find_or_add_keyword(name_idx);
                        view.ensure_keyword_capacity(view_idx + 1);
                        view_idxs.push(view_idx);
                    }
                    view.record_fetch_flags(seq, flags, &view_idxs);
                }
            }
        }
        i += 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UserCredential};
    use crate::mailbox::storage::StorageRegistry;
    use crate::mailbox::MailboxView;
    use crate::wire::parser::parse_response_line;
    use std::rc::Rc;

    fn test_client() -> Client {
        let cred = Rc::new(UserCredential {
            username: "u".into(),
            password: "p".into(),
        });
        let mut c = Client::new(0, cred, Rc::new(Config::default()));
        let mut reg = StorageRegistry::new();
        c.view = Some(MailboxView::new(reg.get_or_create("INBOX")));
        c.login_state = LoginState::Selected;
        c
    }

    #[test]
    fn issue_login_builds_sasl_free_command() {
        let mut c = test_client();
        c.login_state = LoginState::NonAuth;
        let wire = c.issue_state(State::Login).unwrap();
        assert!(wire.contains("LOGIN \"u\" \"p\""));
    }

    #[test]
    fn issue_fetch_requires_nonempty_view() {
        let mut c = test_client();
        assert!(c.issue_state(State::Fetch).is_none());
        let mut next_uid = 1;
        c.view.as_mut().unwrap().grow_exists(3, &mut next_uid);
        assert!(c.issue_state(State::Fetch).unwrap().contains("FETCH 1:3"));
    }

    #[test]
    fn untagged_exists_grows_view() {
        let mut c = test_client();
        c.next_uid_hint = 10;
        let line = parse_response_line("* 5 EXISTS").unwrap();
        c.handle_untagged(&line);
        assert_eq!(c.view.as_ref().unwrap().len(), 5);
    }

    #[test]
    fn untagged_fetch_flags_updates_dirty_state() {
        let mut c = test_client();
        let mut next_uid = 10;
        c.view.as_mut().unwrap().grow_exists(1, &mut next_uid);
        let line = parse_response_line("* 1 FETCH (FLAGS (\\Seen \\Flagged))").unwrap();
        c.handle_untagged(&line);
        let meta = c.view.as_ref().unwrap().metadata_at_seq(1).unwrap();
        assert!(meta.mail_flags.unwrap().contains(MailFlags::SEEN));
        assert!(meta.mail_flags.unwrap().contains(MailFlags::FLAGGED));
    }

    #[test]
    fn tagged_login_ok_marks_authenticated_and_requests_spawn() {
        let mut c = test_client();
        c.login_state = LoginState::NonAuth;
        c.queue.send("LOGIN \"u\" \"p\"", State::Login, None, Callback::StateDefault);
        let line = parse_response_line("1 OK LOGIN completed").unwrap();
        let effect = c.handle_tagged(&line);
        assert_eq!(c.login_state, LoginState::Auth);
        assert!(effect.spawn_more_clients);
    }

    #[test]
    fn untagged_permanentflags_registers_keyword_names() {
        let mut c = test_client();
        let line = parse_response_line("* OK [PERMANENTFLAGS (\\Seen \\Flagged \\* $Label)] ok").unwrap();
        c.handle_untagged(&line);
        let storage = c.view.as_ref().unwrap().storage.clone();
        assert!(storage.borrow().keyword_names.find("$Label").is_some());
        assert!(storage.borrow().keyword_names.find("\\Seen").is_none());
    }

    #[test]
    fn store_without_fetch_confirmation_reports_failure() {
        let mut c = test_client();
        c.config = Rc::new(Config {
            assign_flag_owners: true,
            ..Config::default()
        });
        let mut next_uid = 1;
        c.view.as_mut().unwrap().grow_exists(1, &mut next_uid);
        // Mirrors `issue_state(State::Store)`: marks seq 1 dirty, expecting a
        // FETCH FLAGS confirmation that this test never sends.
        c.view.as_mut().unwrap().seq_range_flags_ref(SeqRange::single(1), 1, true);
        c.queue.send(
            "STORE 1:1 +FLAGS (\\Flagged)",
            State::Store,
            Some(SeqRange::single(1)),
            Callback::Store {
                op: StoreOp::Add,
                flags_text: "\\Flagged".into(),
                silent: false,
            },
        );
        // No untagged FETCH FLAGS confirmation arrives for seq 1 before the
        // tagged reply completes.
        let line = parse_response_line("1 OK STORE completed").unwrap();
        let effect = c.handle_tagged(&line);
        let failure = effect.failure.expect("missing confirmation should be reported");
        assert!(failure.contains("seq 1"));
    }

    #[test]
    fn copy_trycreate_emits_create_follow_up() {
        let mut c = test_client();
        let mut next_uid = 1;
        c.view.as_mut().unwrap().grow_exists(1, &mut next_uid);
        c.queue.send(
            "COPY 1:1 \"Archive\"",
            State::Copy,
            Some(SeqRange::single(1)),
            Callback::Copy { dest: "Archive".into() },
        );
        let line = parse_response_line("1 NO [TRYCREATE] no such mailbox").unwrap();
        let effect = c.handle_tagged(&line);
        assert_eq!(effect.follow_up.as_deref(), Some("CREATE \"Archive\"\r\n"));
    }
}
