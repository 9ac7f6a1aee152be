//! Checkpoint Coordinator (spec §4.7).
//!
//! A barrier across every client currently attached to one mailbox
//! storage. `CheckpointState::begin` marks the storage, each client polls
//! `Client::poll_checkpoint` after every tagged reply to report quiescence
//! via `checkpoint_neg`, and once everyone has drained, `verify_cross_client`
//! runs the P7 cross-client agreement check before the barrier lifts.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::warn;

use crate::client::Client;
use crate::mailbox::{MailboxStorage, MailboxView};

/// Tracks one in-progress checkpoint barrier on a single storage.
#[derive(Debug, Default)]
pub struct CheckpointState {
    participants: HashSet<usize>,
    quiesced: HashSet<usize>,
}

impl CheckpointState {
    /// Open a barrier across `participants` (client indices currently
    /// attached to `storage`).
    pub fn begin(storage: &Rc<RefCell<MailboxStorage>>, participants: impl IntoIterator<Item = usize>) -> Self {
        storage.borrow_mut().checkpoint_active = true;
        Self {
            participants: participants.into_iter().collect(),
            quiesced: HashSet::new(),
        }
    }

    /// `checkpoint_neg`: record that `client_idx` has drained its queue and
    /// is ready for the barrier to close.
    pub fn checkpoint_neg(&mut self, client_idx: usize) {
        self.quiesced.insert(client_idx);
    }

    #[must_use]
    pub fn all_quiesced(&self) -> bool {
        self.participants.iter().all(|idx| self.quiesced.contains(idx))
    }

    /// Close the barrier, clearing the storage's `checkpoint_active` flag so
    /// planning can resume.
    pub fn finish(self, storage: &Rc<RefCell<MailboxStorage>>) {
        storage.borrow_mut().checkpoint_active = false;
    }
}

impl Client {
    /// `client_cmd_reply_finish`'s checkpoint half: call after every tagged
    /// reply while a barrier is open on this client's storage.
    pub fn poll_checkpoint(&mut self, state: &mut CheckpointState) {
        if !self.checkpointing {
            return;
        }
        if self.queue.is_empty() {
            state.checkpoint_neg(self.idx);
        }
    }
}

/// P7: after a checkpoint barrier completes, every view on the same
/// storage must agree on UID set and per-UID flags (modulo `\Recent`,
/// which is inherently per-client). Returns one description per mismatch
/// found; an empty vec means the barrier held.
#[must_use]
pub fn verify_cross_client(views: &[&MailboxView]) -> Vec<String> {
    let mut failures = Vec::new();
    let Some((first, rest)) = views.split_first() else {
        return failures;
    };

    for seq in 1..=first.len() as u32 {
        let Some(uid) = first.uid_at_seq(seq) else { continue };
        let base_flags = first.metadata_at_seq(seq).and_then(|m| m.mail_flags).map(strip_recent);

        for other in rest {
            match other.uid_at_seq(seq) {
                Some(other_uid) if other_uid != uid => failures.push(format!(
                    "checkpoint mismatch at seq {seq}: uid {uid} vs {other_uid}"
                )),
                None => failures.push(format!("checkpoint mismatch: seq {seq} missing on one view")),
                Some(_) => {
                    let other_flags = other.metadata_at_seq(seq).and_then(|m| m.mail_flags).map(strip_recent);
                    if other_flags.is_some() && base_flags.is_some() && other_flags != base_flags {
                        failures.push(format!("checkpoint flag mismatch on uid {uid}"));
                    }
                }
            }
        }
    }

    if !failures.is_empty() {
        warn!(count = failures.len(), "checkpoint cross-client verification failed");
    }
    failures
}

fn strip_recent(flags: crate::mailbox::view::MailFlags) -> crate::mailbox::view::MailFlags {
    flags.difference(crate::mailbox::view::MailFlags::RECENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::storage::StorageRegistry;

    #[test]
    fn checkpoint_closes_once_all_participants_quiesce() {
        let mut reg = StorageRegistry::new();
        let storage = reg.get_or_create("INBOX");
        let mut state = CheckpointState::begin(&storage, [0, 1]);
        assert!(!state.all_quiesced());
        state.checkpoint_neg(0);
        assert!(!state.all_quiesced());
        state.checkpoint_neg(1);
        assert!(state.all_quiesced());
        state.finish(&storage);
        assert!(!storage.borrow().checkpoint_active);
    }

    #[test]
    fn cross_client_verify_flags_uid_mismatch() {
        let mut reg = StorageRegistry::new();
        let storage = reg.get_or_create("INBOX");
        let mut view_a = MailboxView::new(Rc::clone(&storage));
        let mut view_b = MailboxView::new(storage);
        let mut uid_a = 1;
        let mut uid_b = 100;
        view_a.grow_exists(2, &mut uid_a);
        view_b.grow_exists(2, &mut uid_b);
        let failures = verify_cross_client(&[&view_a, &view_b]);
        assert!(!failures.is_empty());
    }
}
