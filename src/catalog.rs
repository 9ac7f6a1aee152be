//! State Catalog (spec §4.1).
//!
//! A static table of every command state the planner may emit, plus the
//! synthetic pseudo-states (`Checkpoint`, `Delay`, `Disconnect`) that drive
//! control flow without a wire command. Enum ordering matters: `state <
//! Logout` partitions "active" from "terminal" states, and sequential
//! advancement (`conf.random_states == false`) walks the enum in
//! declaration order, so this list must not be reordered casually.

use bitflags::bitflags;

bitflags! {
    /// Semantic flags on a [`State`] (spec §3, §4.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u16 {
        /// Success moves the session between login states.
        const STATECHANGE = 1 << 0;
        const STATECHANGE_NONAUTH = 1 << 1;
        const STATECHANGE_AUTH = 1 << 2;
        const STATECHANGE_SELECTED = 1 << 3;
        /// Command text binds a message set (seq/UID range).
        const MSGSET = 1 << 4;
        /// Command may renumber or invalidate outstanding message sets.
        const EXPUNGES = 1 << 5;
    }
}

/// Session-level precondition: the minimum login state a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginState {
    NonAuth,
    Auth,
    Selected,
}

/// Every command state the planner may emit, in catalog order. The
/// ordering is load-bearing: `State::Logout` is the terminal/active
/// partition point, and sequential (non-random) advancement walks the
/// discriminants in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    Banner,
    Authenticate,
    Login,
    List,
    MCreate,
    MDelete,
    Status,
    Select,
    Fetch,
    Fetch2,
    Search,
    Sort,
    Thread,
    Copy,
    Store,
    StoreDel,
    Delete,
    Expunge,
    Append,
    Noop,
    Idle,
    Check,
    Logout,
    Disconnect,
    Delay,
    Checkpoint,
    Lmtp,
}

pub const STATE_COUNT: usize = State::Lmtp as usize + 1;

impl State {
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The state used just after `Authenticate`/`Login` when wrapping
    /// sequential advancement past `Logout` (spec §4.2: "on reaching
    /// LOGOUT, wrap to AUTHENTICATE+1").
    #[must_use]
    pub const fn first_active() -> Self {
        Self::List
    }

    #[must_use]
    pub const fn next_in_catalog(self) -> Option<Self> {
        let idx = self as u8;
        if idx as usize + 1 >= STATE_COUNT {
            None
        } else {
            // SAFETY-free: State is #[repr(u8)] and contiguous, checked above.
            Some(unsafe { std::mem::transmute::<u8, Self>(idx + 1) })
        }
    }
}

/// One State Catalog entry (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct StateInfo {
    pub state: State,
    pub name: &'static str,
    pub tag_prefix: &'static str,
    pub login_state: LoginState,
    pub probability: u8,
    pub probability_again: u8,
    pub flags: StateFlags,
}

macro_rules! entry {
    ($state:ident, $name:literal, $prefix:literal, $login:ident, $prob:literal, $again:literal, $flags:expr) => {
        StateInfo {
            state: State::$state,
            name: $name,
            tag_prefix: $prefix,
            login_state: LoginState::$login,
            probability: $prob,
            probability_again: $again,
            flags: $flags,
        }
    };
}

/// The static catalog, index-aligned with [`State`] discriminants.
pub static CATALOG: [StateInfo; STATE_COUNT] = [
    entry!(Banner, "BANNER", "Bann", NonAuth, 0, 0, StateFlags::empty()),
    entry!(
        Authenticate,
        "AUTHENTICATE",
        "Auth",
        NonAuth,
        0,
        0,
        StateFlags::STATECHANGE.union(StateFlags::STATECHANGE_AUTH)
    ),
    entry!(
        Login,
        "LOGIN",
        "Logi",
        NonAuth,
        100,
        0,
        StateFlags::STATECHANGE.union(StateFlags::STATECHANGE_AUTH)
    ),
    entry!(List, "LIST", "List", Auth, 50, 0, StateFlags::EXPUNGES),
    entry!(MCreate, "MCREATE", "MCre", Auth, 0, 0, StateFlags::EXPUNGES),
    entry!(MDelete, "MDELETE", "MDel", Auth, 0, 0, StateFlags::EXPUNGES),
    entry!(Status, "STATUS", "Stat", Auth, 50, 0, StateFlags::EXPUNGES),
    entry!(
        Select,
        "SELECT",
        "Sele",
        Auth,
        100,
        0,
        StateFlags::STATECHANGE.union(StateFlags::STATECHANGE_SELECTED)
    ),
    entry!(Fetch, "FETCH", "Fetc", Selected, 100, 0, StateFlags::MSGSET),
    entry!(Fetch2, "FETCH2", "Fet2", Selected, 100, 30, StateFlags::MSGSET),
    entry!(Search, "SEARCH", "Sear", Selected, 0, 0, StateFlags::MSGSET),
    entry!(Sort, "SORT", "Sort", Selected, 0, 0, StateFlags::MSGSET),
    entry!(Thread, "THREAD", "Thre", Selected, 0, 0, StateFlags::MSGSET),
    entry!(
        Copy,
        "COPY",
        "Copy",
        Selected,
        33,
        5,
        StateFlags::MSGSET.union(StateFlags::EXPUNGES)
    ),
    entry!(Store, "STORE", "Stor", Selected, 50, 0, StateFlags::MSGSET),
    entry!(StoreDel, "STORE", "Stor", Selected, 50, 0, StateFlags::MSGSET),
    entry!(Delete, "DELETE", "Dele", Selected, 100, 0, StateFlags::MSGSET),
    entry!(Expunge, "EXPUNGE", "Expu", Selected, 100, 0, StateFlags::EXPUNGES),
    entry!(Append, "APPEND", "Appe", Auth, 100, 5, StateFlags::EXPUNGES),
    entry!(Noop, "NOOP", "Noop", Auth, 0, 0, StateFlags::EXPUNGES),
    entry!(
        Idle,
        "IDLE",
        "Idle",
        Auth,
        0,
        0,
        StateFlags::EXPUNGES.union(StateFlags::STATECHANGE)
    ),
    entry!(Check, "CHECK", "Chec", Auth, 0, 0, StateFlags::EXPUNGES),
    entry!(
        Logout,
        "LOGOUT",
        "Logo",
        NonAuth,
        100,
        0,
        StateFlags::STATECHANGE.union(StateFlags::STATECHANGE_NONAUTH)
    ),
    entry!(Disconnect, "DISCONNECT", "Disc", NonAuth, 0, 0, StateFlags::empty()),
    entry!(Delay, "DELAY", "Dela", NonAuth, 0, 0, StateFlags::empty()),
    entry!(Checkpoint, "CHECKPOINT!", "ChkP", NonAuth, 0, 0, StateFlags::empty()),
    entry!(Lmtp, "LMTP", "LMTP", NonAuth, 0, 0, StateFlags::empty()),
];

#[must_use]
pub fn info(state: State) -> &'static StateInfo {
    &CATALOG[state.index()]
}

/// `flags2login_state`: the login state a `STATECHANGE` state's success
/// moves the session to.
///
/// # Panics
/// Panics if `flags` carries `STATECHANGE` without one of the three
/// target-state bits, which would indicate a broken catalog entry.
#[must_use]
pub fn flags_to_login_state(flags: StateFlags) -> LoginState {
    if flags.contains(StateFlags::STATECHANGE_NONAUTH) {
        LoginState::NonAuth
    } else if flags.contains(StateFlags::STATECHANGE_AUTH) {
        LoginState::Auth
    } else if flags.contains(StateFlags::STATECHANGE_SELECTED) {
        LoginState::Selected
    } else {
        unreachable!("STATECHANGE flag without a target login state")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuntimeCounters {
    pub issued: [u64; STATE_COUNT],
    pub timer_msecs: [u64; STATE_COUNT],
    pub timer_counts: [u64; STATE_COUNT],
}

impl Default for RuntimeCounters {
    fn default() -> Self {
        Self {
            issued: [0; STATE_COUNT],
            timer_msecs: [0; STATE_COUNT],
            timer_counts: [0; STATE_COUNT],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_index_aligned() {
        for (idx, entry) in CATALOG.iter().enumerate() {
            assert_eq!(entry.state.index(), idx);
        }
    }

    #[test]
    fn login_flags_round_trip() {
        assert_eq!(
            flags_to_login_state(StateFlags::STATECHANGE_AUTH),
            LoginState::Auth
        );
        assert_eq!(
            flags_to_login_state(StateFlags::STATECHANGE_SELECTED),
            LoginState::Selected
        );
    }

    #[test]
    fn state_order_partitions_active_terminal() {
        assert!(State::Select < State::Logout);
        assert!(State::Logout < State::Disconnect);
    }
}
