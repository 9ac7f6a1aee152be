//! Mailbox View (spec §3, §4.3).
//!
//! A per-client ordered sequence view of a mailbox: seq→UID map, per-seq
//! dynamic metadata, and the flag-change dirty-tracking state machine used
//! to validate STORE/FETCH round-trips.
//!
//! Dirty-type transitions and the `seq_range_flags_ref` refcount primitive
//! are grounded directly on `original_source/src/client-state.c`
//! (`metadata_update_dirty`, `seq_range_flags_ref`): issuing a command that
//! expects a FETCH FLAGS reply (`diff > 0`) marks the message dirty unless
//! it's already `Waiting`; a command completing (`diff < 0`) commits a
//! `Maybe` classification to `No`. This is the opposite pairing of
//! "issuing ⇒ dirty" / "completing ⇒ clean" from the one spec.md's prose
//! literally states for `diff`'s sign — the original source is treated as
//! authoritative here (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use super::keyword::alloc_size_for;
use super::storage::{MailboxStorage, MessageMetadataStatic};

bitflags! {
    /// System (`\`-prefixed) IMAP flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MailFlags: u8 {
        const SEEN = 1 << 0;
        const ANSWERED = 1 << 1;
        const FLAGGED = 1 << 2;
        const DELETED = 1 << 3;
        const DRAFT = 1 << 4;
        const RECENT = 1 << 5;
    }
}

impl MailFlags {
    #[must_use]
    pub fn parse_one(token: &str) -> Self {
        match token {
            "\\Seen" => Self::SEEN,
            "\\Answered" => Self::ANSWERED,
            "\\Flagged" => Self::FLAGGED,
            "\\Deleted" => Self::DELETED,
            "\\Draft" => Self::DRAFT,
            "\\Recent" => Self::RECENT,
            _ => Self::empty(),
        }
    }

    #[must_use]
    pub fn to_wire_string(self) -> String {
        let mut parts = Vec::new();
        if self.contains(Self::SEEN) {
            parts.push("\\Seen");
        }
        if self.contains(Self::ANSWERED) {
            parts.push("\\Answered");
        }
        if self.contains(Self::FLAGGED) {
            parts.push("\\Flagged");
        }
        if self.contains(Self::DELETED) {
            parts.push("\\Deleted");
        }
        if self.contains(Self::DRAFT) {
            parts.push("\\Draft");
        }
        if self.contains(Self::RECENT) {
            parts.push("\\Recent");
        }
        parts.join(" ")
    }
}

/// Four-valued dirty-type (spec §3). Deliberately a tagged enum, not a
/// boolean pair: all transitions are exhaustively matched below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagchangeDirty {
    /// Local model matches server.
    No,
    /// Sent STORE, no FETCH FLAGS seen yet.
    Yes,
    /// Got a FETCH FLAGS but more commands still outstanding.
    Waiting,
    /// One command outstanding, FETCH already arrived, but it may have
    /// been unsolicited.
    Maybe,
}

/// `metadata_update_dirty`: applied before the refcount itself changes.
fn apply_dirty_transition(dirty: &mut FlagchangeDirty, set: bool) {
    if set {
        if *dirty == FlagchangeDirty::Maybe {
            *dirty = FlagchangeDirty::No;
        }
    } else if *dirty != FlagchangeDirty::Waiting {
        *dirty = FlagchangeDirty::Yes;
    }
}

/// Dynamic per-message metadata (spec §3), indexed by 0-based sequence
/// number within a [`MailboxView`].
#[derive(Debug, Clone)]
pub struct DynamicMetadata {
    pub mail_flags: Option<MailFlags>,
    pub keyword_bitmask: Vec<u8>,
    pub ms: Rc<RefCell<MessageMetadataStatic>>,
    pub fetch_refcount: u32,
    pub dirty: FlagchangeDirty,
}

impl DynamicMetadata {
    fn new(ms: Rc<RefCell<MessageMetadataStatic>>, alloc_size: usize) -> Self {
        ms.borrow_mut().refcount += 1;
        Self {
            mail_flags: None,
            keyword_bitmask: vec![0; alloc_size],
            ms,
            fetch_refcount: 0,
            dirty: FlagchangeDirty::No,
        }
    }

    #[must_use]
    pub fn mail_flags_set(&self) -> bool {
        self.mail_flags.is_some()
    }

    pub fn set_keyword(&mut self, idx: usize, on: bool) {
        let byte = idx / 8;
        let bit = 1u8 << (idx % 8);
        if byte >= self.keyword_bitmask.len() {
            return;
        }
        if on {
            self.keyword_bitmask[byte] |= bit;
        } else {
            self.keyword_bitmask[byte] &= !bit;
        }
    }

    #[must_use]
    pub fn has_keyword(&self, idx: usize) -> bool {
        let byte = idx / 8;
        let bit = 1u8 << (idx % 8);
        byte < self.keyword_bitmask.len() && self.keyword_bitmask[byte] & bit != 0
    }
}

/// One view-local keyword usage record (spec §3: "all keywords used
/// currently in a mailbox", per view).
#[derive(Debug, Clone)]
pub struct ViewKeyword {
    pub name_idx: usize,
    pub refcount: u32,
    pub permanent: bool,
}

/// A half-open, 1-based inclusive sequence range, `seq1..=seq2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    pub seq1: u32,
    pub seq2: u32,
}

impl SeqRange {
    #[must_use]
    pub const fn single(seq: u32) -> Self {
        Self { seq1: seq, seq2: seq }
    }
}

/// Per-client ordered sequence view of a mailbox (spec §3).
#[derive(Debug)]
pub struct MailboxView {
    pub storage: Rc<RefCell<MailboxStorage>>,
    pub keyword_bitmask_alloc_size: usize,
    pub flags_counter: u32,
    pub recent_count: u32,
    pub select_uidnext: Option<u32>,
    pub readwrite: bool,
    pub highest_modseq: u64,
    pub keywords: Vec<ViewKeyword>,
    uidmap: Vec<u32>,
    messages: Vec<DynamicMetadata>,
}

impl MailboxView {
    #[must_use]
    pub fn new(storage: Rc<RefCell<MailboxStorage>>) -> Self {
        Self {
            storage,
            keyword_bitmask_alloc_size: 0,
            flags_counter: 0,
            recent_count: 0,
            select_uidnext: None,
            readwrite: false,
            highest_modseq: 0,
            keywords: Vec::new(),
            uidmap: Vec::new(),
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.uidmap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uidmap.is_empty()
    }

    /// Invariant P1: `uidmap.length == messages.length`.
    #[must_use]
    pub fn lengths_match(&self) -> bool {
        self.uidmap.len() == self.messages.len()
    }

    /// Invariant P2: UIDs are strictly increasing.
    #[must_use]
    pub fn uids_strictly_increasing(&self) -> bool {
        self.uidmap.windows(2).all(|w| w[0] < w[1])
    }

    #[must_use]
    pub fn uid_at_seq(&self, seq: u32) -> Option<u32> {
        self.uidmap.get(seq.checked_sub(1)? as usize).copied()
    }

    #[must_use]
    pub fn metadata_at_seq(&self, seq: u32) -> Option<&DynamicMetadata> {
        self.messages.get(seq.checked_sub(1)? as usize)
    }

    pub fn metadata_at_seq_mut(&mut self, seq: u32) -> Option<&mut DynamicMetadata> {
        self.messages.get_mut(seq.checked_sub(1)? as usize)
    }

    /// EXISTS n: grow uidmap/messages to `new_count` entries. New UIDs are
    /// synthesized sequentially above the current max (a real client would
    /// learn them from subsequent untagged FETCH/UID FETCH; this keeps P2
    /// trivially true for freshly-grown slots until a FETCH corrects them).
    pub fn grow_exists(&mut self, new_count: u32, next_uid_hint: &mut u32) {
        let target = new_count as usize;
        while self.uidmap.len() < target {
            let uid = *next_uid_hint;
            *next_uid_hint += 1;
            let ms = self.storage.borrow_mut().static_get(uid);
            self.uidmap.push(uid);
            self.messages.push(DynamicMetadata::new(ms, self.keyword_bitmask_alloc_size));
        }
    }

    /// Bind a specific UID at the next sequence slot (used when a real
    /// FETCH/EXISTS pair reveals the UID rather than synthesizing one).
    pub fn push_known(&mut self, uid: u32) {
        let ms = self.storage.borrow_mut().static_get(uid);
        self.uidmap.push(uid);
        self.messages.push(DynamicMetadata::new(ms, self.keyword_bitmask_alloc_size));
    }

    /// EXPUNGE seq (1-based): remove the entry, decrement recent count if
    /// applicable, decrement the static metadata refcount, and mark the
    /// static record expunged once nothing references it.
    pub fn expunge(&mut self, seq: u32) {
        let Some(idx) = seq.checked_sub(1).map(|i| i as usize) else {
            return;
        };
        if idx >= self.uidmap.len() {
            return;
        }
        let uid = self.uidmap.remove(idx);
        let removed = self.messages.remove(idx);
        if removed
            .mail_flags
            .is_some_and(|f| f.contains(MailFlags::RECENT))
        {
            self.recent_count = self.recent_count.saturating_sub(1);
        }
        let mut ms = removed.ms.borrow_mut();
        ms.refcount = ms.refcount.saturating_sub(1);
        if ms.refcount == 0 {
            ms.expunged = true;
            drop(ms);
            self.storage.borrow_mut().mark_expunged(uid);
        }
    }

    /// Record an untagged `FETCH n (FLAGS (...))`: replaces the message's
    /// flags/keywords wholesale (a FETCH FLAGS reply is authoritative for
    /// everything it lists) and reclassifies dirty state from the current
    /// `fetch_refcount` (spec §4.3/§4.6): `No` once nothing is outstanding,
    /// `Waiting` if more than one command still is, `Maybe` if exactly one
    /// remains.
    pub fn record_fetch_flags(&mut self, seq: u32, flags: MailFlags, keyword_idxs: &[usize]) {
        let alloc = self.keyword_bitmask_alloc_size;
        let Some(meta) = self.metadata_at_seq_mut(seq) else {
            return;
        };
        meta.mail_flags = Some(flags);
        meta.keyword_bitmask = vec![0; alloc];
        for &idx in keyword_idxs {
            meta.set_keyword(idx, true);
        }
        meta.dirty = match meta.fetch_refcount {
            0 => FlagchangeDirty::No,
            1 => FlagchangeDirty::Maybe,
            _ => FlagchangeDirty::Waiting,
        };
    }

    /// `seq_range_flags_ref`: central refcount primitive. `diff > 0` means
    /// a command is being issued that expects a FETCH FLAGS reply; `diff <
    /// 0` means such a command has just completed.
    pub fn seq_range_flags_ref(&mut self, range: SeqRange, diff: i32, update_dirty: bool) {
        for seq in range.seq1..=range.seq2 {
            let Some(meta) = self.metadata_at_seq_mut(seq) else {
                continue;
            };
            if update_dirty {
                apply_dirty_transition(&mut meta.dirty, diff < 0);
            }
            if diff < 0 {
                meta.fetch_refcount = meta.fetch_refcount.saturating_sub(1);
            } else {
                meta.fetch_refcount += 1;
            }
        }
    }

    /// Grow `keyword_bitmask_alloc_size` to fit `keyword_count` keywords,
    /// reallocating (zero-extending) every message's bitmask.
    pub fn ensure_keyword_capacity(&mut self, keyword_count: usize) {
        let needed = alloc_size_for(keyword_count);
        if needed <= self.keyword_bitmask_alloc_size {
            return;
        }
        self.keyword_bitmask_alloc_size = needed;
        for meta in &mut self.messages {
            meta.keyword_bitmask.resize(needed, 0);
        }
    }

    pub fn find_or_add_keyword(&mut self, name_idx: usize) -> usize {
        if let Some(pos) = self.keywords.iter().position(|k| k.name_idx == name_idx) {
            return pos;
        }
        self.keywords.push(ViewKeyword {
            name_idx,
            refcount: 0,
            permanent: false,
        });
        self.keywords.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::storage::StorageRegistry;

    fn view_with(n: u32) -> MailboxView {
        let mut reg = StorageRegistry::new();
        let storage = reg.get_or_create("INBOX");
        let mut view = MailboxView::new(storage);
        let mut next_uid = 10;
        view.grow_exists(n, &mut next_uid);
        view
    }

    #[test]
    fn grow_exists_keeps_lengths_aligned() {
        let view = view_with(3);
        assert!(view.lengths_match());
        assert!(view.uids_strictly_increasing());
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn expunge_shrinks_and_shifts() {
        let mut view = view_with(3);
        let middle_uid = view.uid_at_seq(2).unwrap();
        view.expunge(2);
        assert_eq!(view.len(), 2);
        assert!(view.lengths_match());
        assert_ne!(view.uid_at_seq(2), Some(middle_uid));
    }

    #[test]
    fn issuing_command_dirties_clean_message() {
        let mut view = view_with(1);
        view.seq_range_flags_ref(SeqRange::single(1), 1, true);
        assert_eq!(view.metadata_at_seq(1).unwrap().dirty, FlagchangeDirty::Yes);
        assert_eq!(view.metadata_at_seq(1).unwrap().fetch_refcount, 1);
    }

    #[test]
    fn waiting_survives_another_issue() {
        let mut view = view_with(1);
        view.seq_range_flags_ref(SeqRange::single(1), 1, true);
        view.metadata_at_seq_mut(1).unwrap().dirty = FlagchangeDirty::Waiting;
        view.seq_range_flags_ref(SeqRange::single(1), 1, true);
        assert_eq!(view.metadata_at_seq(1).unwrap().dirty, FlagchangeDirty::Waiting);
    }

    #[test]
    fn completing_command_commits_maybe_to_no() {
        let mut view = view_with(1);
        view.metadata_at_seq_mut(1).unwrap().fetch_refcount = 1;
        view.metadata_at_seq_mut(1).unwrap().dirty = FlagchangeDirty::Maybe;
        view.seq_range_flags_ref(SeqRange::single(1), -1, true);
        assert_eq!(view.metadata_at_seq(1).unwrap().dirty, FlagchangeDirty::No);
        assert_eq!(view.metadata_at_seq(1).unwrap().fetch_refcount, 0);
    }

    #[test]
    fn record_fetch_flags_classifies_by_refcount() {
        let mut view = view_with(1);
        view.metadata_at_seq_mut(1).unwrap().fetch_refcount = 0;
        view.record_fetch_flags(1, MailFlags::SEEN, &[]);
        assert_eq!(view.metadata_at_seq(1).unwrap().dirty, FlagchangeDirty::No);

        view.metadata_at_seq_mut(1).unwrap().fetch_refcount = 1;
        view.record_fetch_flags(1, MailFlags::SEEN, &[]);
        assert_eq!(view.metadata_at_seq(1).unwrap().dirty, FlagchangeDirty::Maybe);

        view.metadata_at_seq_mut(1).unwrap().fetch_refcount = 2;
        view.record_fetch_flags(1, MailFlags::SEEN, &[]);
        assert_eq!(view.metadata_at_seq(1).unwrap().dirty, FlagchangeDirty::Waiting);
    }

    #[test]
    fn keyword_capacity_grows_in_power_of_two_bytes() {
        let mut view = view_with(1);
        view.ensure_keyword_capacity(9);
        assert_eq!(view.keyword_bitmask_alloc_size, 2);
        assert_eq!(view.metadata_at_seq(1).unwrap().keyword_bitmask.len(), 2);
    }
}
