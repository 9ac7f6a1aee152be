//! Mailbox Storage (spec §3, §4.3, §5).
//!
//! One instance per mailbox name, shared among every client using that
//! mailbox. Per the design notes (spec §9), storages live in a
//! process-wide registry keyed by name; since the whole run is a single
//! cooperative thread (spec §5), `Rc<RefCell<_>>` replaces the original's
//! manual refcounting and no mutex is needed.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use super::keyword::KeywordRegistry;

pub const MAIL_FLAGS_OWN_COUNT: usize = 5;
pub const MAIL_FLAG_DELETED_IDX: usize = 2;

/// Shared, parsed message body, potentially referenced by static metadata
/// records across multiple storages (spec §5: "Global per-message ...
/// metadata may be shared across storages via a content registry keyed by
/// message id"). Kept intentionally small: body content generation is the
/// mailbox-source collaborator's job (spec §6), not the core's.
#[derive(Debug, Clone)]
pub struct MessageGlobal {
    pub message_id: String,
    pub header_size: u64,
    pub body_size: u64,
}

/// Static per-message metadata (spec §3), refcounted across views.
#[derive(Debug, Clone)]
pub struct MessageMetadataStatic {
    pub uid: u32,
    pub refcount: u32,
    pub internaldate: i64,
    pub internaldate_tz: i32,
    pub owner_client_idx1: u32,
    pub message: Option<Rc<MessageGlobal>>,
    pub expunged: bool,
}

impl MessageMetadataStatic {
    #[must_use]
    pub const fn new(uid: u32, internaldate: i64, internaldate_tz: i32) -> Self {
        Self {
            uid,
            refcount: 0,
            internaldate,
            internaldate_tz,
            owner_client_idx1: 0,
            message: None,
            expunged: false,
        }
    }
}

/// One mailbox's process-wide model (spec §3).
#[derive(Debug)]
pub struct MailboxStorage {
    pub name: String,
    /// 0 until the first SELECT/STATUS response sets it; never changes
    /// again during a run (spec invariant, P3).
    pub uidvalidity: u32,
    /// Ordered by UID ascending.
    static_metadata: Vec<Rc<RefCell<MessageMetadataStatic>>>,
    pub keyword_names: KeywordRegistry,
    /// UIDs known to be expunged; may include UIDs never observed.
    pub expunged_uids: BTreeSet<u32>,
    /// 1-based owner client index per system flag slot; 0 = unowned.
    pub flags_owner_client_idx1: [u32; MAIL_FLAGS_OWN_COUNT],
    pub assign_msg_owners: bool,
    pub assign_flag_owners: bool,
    pub flag_owner_clients_assigned: bool,
    pub seen_all_recent: bool,
    pub dont_track_recent: bool,
    /// Set while a checkpoint barrier is active on this storage.
    pub checkpoint_active: bool,
}

impl MailboxStorage {
    #[must_use]
    fn new(name: String) -> Self {
        Self {
            name,
            uidvalidity: 0,
            static_metadata: Vec::new(),
            keyword_names: KeywordRegistry::default(),
            expunged_uids: BTreeSet::new(),
            flags_owner_client_idx1: [0; MAIL_FLAGS_OWN_COUNT],
            assign_msg_owners: false,
            assign_flag_owners: false,
            flag_owner_clients_assigned: false,
            seen_all_recent: false,
            dont_track_recent: false,
            checkpoint_active: false,
        }
    }

    /// Look up (or create) the static metadata record for `uid`, keeping
    /// `static_metadata` sorted by UID ascending.
    pub fn static_get(&mut self, uid: u32) -> Rc<RefCell<MessageMetadataStatic>> {
        match self.static_metadata.binary_search_by_key(&uid, |m| m.borrow().uid) {
            Ok(idx) => Rc::clone(&self.static_metadata[idx]),
            Err(idx) => {
                let internaldate = i64::from(uid) * 60;
                let rec = Rc::new(RefCell::new(MessageMetadataStatic::new(uid, internaldate, 0)));
                self.static_metadata.insert(idx, Rc::clone(&rec));
                rec
            }
        }
    }

    #[must_use]
    pub fn static_lookup(&self, uid: u32) -> Option<Rc<RefCell<MessageMetadataStatic>>> {
        self.static_metadata
            .binary_search_by_key(&uid, |m| m.borrow().uid)
            .ok()
            .map(|idx| Rc::clone(&self.static_metadata[idx]))
    }

    pub fn mark_expunged(&mut self, uid: u32) {
        self.expunged_uids.insert(uid);
        if let Some(rec) = self.static_lookup(uid) {
            rec.borrow_mut().expunged = true;
        }
    }

    #[must_use]
    pub fn is_expunged(&self, uid: u32) -> bool {
        self.expunged_uids.contains(&uid)
    }

    /// `assign_flag_owners`: claim exclusive ownership of `flag_idx` for
    /// `client_idx1` if unowned, returning whether the caller now owns it.
    pub fn claim_flag_owner(&mut self, flag_idx: usize, client_idx1: u32) -> bool {
        let slot = &mut self.flags_owner_client_idx1[flag_idx];
        if *slot == 0 {
            *slot = client_idx1;
        }
        *slot == client_idx1
    }
}

/// Process-wide storages registry (spec §9: "a process-wide registry keyed
/// by name"). Holds only weak references: a storage is destroyed the
/// moment its last view drops, matching spec §5's refcounting lifecycle.
#[derive(Debug, Default)]
pub struct StorageRegistry {
    storages: HashMap<String, Weak<RefCell<MailboxStorage>>>,
}

impl StorageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `mailbox_storage_get`: return the shared storage for `name`,
    /// creating it if this is the first caller (or the previous owner has
    /// dropped it).
    pub fn get_or_create(&mut self, name: &str) -> Rc<RefCell<MailboxStorage>> {
        if let Some(existing) = self.storages.get(name).and_then(Weak::upgrade) {
            return existing;
        }
        let storage = Rc::new(RefCell::new(MailboxStorage::new(name.to_string())));
        self.storages.insert(name.to_string(), Rc::downgrade(&storage));
        storage
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.storages.values().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_shares_storage_by_name() {
        let mut reg = StorageRegistry::new();
        let a = reg.get_or_create("INBOX");
        let b = reg.get_or_create("INBOX");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn registry_drops_storage_when_unreferenced() {
        let mut reg = StorageRegistry::new();
        {
            let _a = reg.get_or_create("INBOX");
            assert_eq!(reg.live_count(), 1);
        }
        assert_eq!(reg.live_count(), 0);
        let c = reg.get_or_create("INBOX");
        assert_eq!(c.borrow().uidvalidity, 0);
    }

    #[test]
    fn static_metadata_stays_uid_sorted() {
        let mut storage = MailboxStorage::new("INBOX".to_string());
        storage.static_get(30);
        storage.static_get(10);
        storage.static_get(20);
        let uids: Vec<u32> = storage.static_metadata.iter().map(|m| m.borrow().uid).collect();
        assert_eq!(uids, vec![10, 20, 30]);
    }

    #[test]
    fn flag_owner_claim_is_exclusive() {
        let mut storage = MailboxStorage::new("INBOX".to_string());
        assert!(storage.claim_flag_owner(0, 1));
        assert!(!storage.claim_flag_owner(0, 2));
        assert!(storage.claim_flag_owner(0, 1));
    }
}
