//! Per-client session state (spec §3: "Client").
//!
//! Holds everything the planner, reply router, and APPEND driver need to
//! drive one simulated IMAP session: login state, the mailbox view once
//! selected, the lookahead plan, the in-flight command queue, negotiated
//! capabilities, and APPEND upload progress. Owned by [`crate::world::World`]
//! and driven from its own cooperative task (spec §5: one `Rc<RefCell<_>>`
//! per shared resource, no locking).

use std::collections::VecDeque;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::capabilities::Capabilities;
use crate::catalog::{LoginState, State};
use crate::config::{Config, UserCredential};
use crate::mailbox::MailboxView;
use crate::queue::CommandQueue;

/// Default lookahead buffer size (spec §3: "bounded capacity, typical
/// 3-8").
pub const DEFAULT_PLAN_CAPACITY: usize = 6;

#[derive(Debug)]
pub struct Client {
    /// Stable index in the global client set (spec §3).
    pub idx: usize,
    pub credential: Rc<UserCredential>,
    pub config: Rc<Config>,

    pub login_state: LoginState,
    pub view: Option<MailboxView>,
    /// Next UID to synthesize when an untagged EXISTS grows the view past
    /// what a FETCH has already revealed (spec §4.3: `grow_exists`).
    pub next_uid_hint: u32,

    /// Short ordered lookahead buffer the planner keeps filled.
    pub plan: VecDeque<State>,
    pub plan_capacity: usize,
    /// Tracks sequential (non-random) advancement across planner calls.
    pub last_sequential_state: State,

    pub queue: CommandQueue,
    pub capabilities: Capabilities,
    pub rng: StdRng,

    /// At most one outstanding SEARCH per client (spec §3 invariant).
    pub search_pending: bool,
    /// Set once a SELECT/STATUS/COPY/APPEND NO suggests the mailbox is
    /// missing, so the next reply triggers a CREATE retry.
    pub try_create_mailbox: bool,
    pub seen_bye: bool,

    pub idling: bool,
    pub idle_done_sent: bool,
    pub idle_wait_cont: bool,

    /// Set by the planner after issuing a command with probability
    /// `probability(DELAY)`; the driving task sleeps and clears it.
    pub delayed: bool,

    pub qresync_enabled: bool,
    pub highest_untagged_modseq: Option<u64>,

    /// Set while this client's storage has an active checkpoint barrier
    /// (spec §4.7): suppress new command emission until quiesced.
    pub checkpointing: bool,

    /// APPEND literal upload progress (spec §4.5).
    pub append_mid_upload: bool,
    pub append_unfinished: bool,
    pub append_vsize_remaining: u64,
    pub append_literal_plus: bool,
    pub append_dest_mailbox: String,
}

impl Client {
    #[must_use]
    pub fn new(idx: usize, credential: Rc<UserCredential>, config: Rc<Config>) -> Self {
        let mailbox = config.mailbox.clone();
        let try_create_mailbox = config.try_create_mailbox;
        Self {
            idx,
            credential,
            config,
            login_state: LoginState::NonAuth,
            view: None,
            next_uid_hint: 1,
            plan: VecDeque::new(),
            plan_capacity: DEFAULT_PLAN_CAPACITY,
            last_sequential_state: State::Banner,
            queue: CommandQueue::new(),
            capabilities: Capabilities::empty(),
            rng: StdRng::from_entropy(),
            search_pending: false,
            try_create_mailbox,
            seen_bye: false,
            idling: false,
            idle_done_sent: false,
            idle_wait_cont: false,
            delayed: false,
            qresync_enabled: false,
            highest_untagged_modseq: None,
            checkpointing: false,
            append_mid_upload: false,
            append_unfinished: false,
            append_vsize_remaining: 0,
            append_literal_plus: false,
            append_dest_mailbox: mailbox,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.login_state >= LoginState::Auth
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.login_state == LoginState::Selected
    }

    /// `client_disconnect`: abandon in-flight commands and drop the view,
    /// leaving the client ready to be torn down or reset to NONAUTH.
    pub fn disconnect(&mut self) {
        self.queue.clear();
        self.view = None;
        self.login_state = LoginState::NonAuth;
        self.plan.clear();
        self.idling = false;
        self.idle_done_sent = false;
        self.idle_wait_cont = false;
        self.append_mid_upload = false;
        self.append_unfinished = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        let cred = Rc::new(UserCredential {
            username: "user1".into(),
            password: "pass1".into(),
        });
        Client::new(0, cred, Rc::new(Config::default()))
    }

    #[test]
    fn new_client_starts_nonauth_with_empty_plan() {
        let c = test_client();
        assert_eq!(c.login_state, LoginState::NonAuth);
        assert!(c.plan.is_empty());
        assert!(c.view.is_none());
    }

    #[test]
    fn disconnect_clears_queue_and_view() {
        let mut c = test_client();
        c.login_state = LoginState::Selected;
        c.queue.send("NOOP", State::Noop, None, crate::queue::Callback::StateDefault);
        c.disconnect();
        assert!(c.queue.is_empty());
        assert_eq!(c.login_state, LoginState::NonAuth);
    }
}
