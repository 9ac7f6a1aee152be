//! Command Planner (spec §4.2).
//!
//! Two halves, matching the original's split: [`Client::update_plan`] keeps
//! a short lookahead buffer of legal next states filled, and
//! [`Client::plan_send_more_commands`] walks that buffer, gating each
//! candidate against whatever is currently in flight before calling
//! `reply::Client::issue_state` to turn it into wire text and register the
//! expected reply. Issuing inline, rather than batching states up for the
//! caller to issue afterward, is what makes the in-flight gating in
//! `can_issue_now` see commands issued earlier in the same call. APPEND is
//! the one exception: its literal upload needs driving-task-level control,
//! so it's reported with no wire text and the caller drives it separately.

use rand::Rng;

use crate::catalog::{flags_to_login_state, info, LoginState, State, StateFlags};
use crate::client::Client;

/// `do_rand(probability)`: true with the given percent chance (0-100).
fn do_rand(rng: &mut impl rand::Rng, probability: u8) -> bool {
    rng.gen_range(0..100) < u32::from(probability)
}

impl Client {
    /// `client_get_next_state` (spec §4.2): uniform pick over `[LIST,
    /// LOGOUT]` in random mode, otherwise sequential advancement wrapping
    /// `LOGOUT -> AUTHENTICATE+1`. Either way, a candidate is rejected
    /// (and another drawn) until `do_rand(probability)` accepts it.
    pub fn next_state(&mut self) -> State {
        loop {
            let candidate = if self.config.random_states {
                let lo = State::List.index() as u8;
                let hi = State::Logout.index() as u8;
                let idx = self.rng.gen_range(lo..=hi);
                // SAFETY: State is #[repr(u8)] and contiguous; idx is
                // clamped to the [List, Logout] discriminant range above.
                unsafe { std::mem::transmute::<u8, State>(idx) }
            } else {
                match self.last_sequential_state.next_in_catalog() {
                    Some(s) if s.index() <= State::Logout.index() => s,
                    _ => State::first_active(),
                }
            };
            if !self.config.random_states {
                self.last_sequential_state = candidate;
            }
            if do_rand(&mut self.rng, info(candidate).probability) {
                return candidate;
            }
        }
    }

    /// `client_update_plan` (spec §4.2): keep the lookahead buffer filled
    /// with legal next states, freezing extension around state changes.
    pub fn update_plan(&mut self) {
        loop {
            if let Some(&last) = self.plan.back() {
                if info(last).flags.contains(StateFlags::STATECHANGE) {
                    return;
                }
                if last == State::Logout {
                    return;
                }
            }
            if self
                .queue
                .has_state_matching(|s| info(s).flags.contains(StateFlags::STATECHANGE))
            {
                return;
            }

            let candidate = match self.login_state {
                LoginState::NonAuth => {
                    if !self.plan.is_empty() {
                        return;
                    }
                    if do_rand(&mut self.rng, info(State::Authenticate).probability) {
                        State::Authenticate
                    } else {
                        State::Login
                    }
                }
                LoginState::Auth | LoginState::Selected => {
                    if let Some(&last) = self.plan.back() {
                        if do_rand(&mut self.rng, info(last).probability_again) {
                            last
                        } else {
                            self.next_state()
                        }
                    } else {
                        self.next_state()
                    }
                }
            };

            // Drop candidates that require a higher login_state, or that
            // re-attempt auth while already authenticated.
            if info(candidate).login_state > self.login_state {
                continue;
            }
            if matches!(candidate, State::Authenticate | State::Login)
                && self.login_state != LoginState::NonAuth
            {
                continue;
            }

            self.plan.push_back(candidate);
            if info(candidate).flags.contains(StateFlags::STATECHANGE) {
                return;
            }
            if self.plan.len() >= self.plan_capacity {
                return;
            }
        }
    }

    /// Issue-time gating (spec §4.2): is `candidate` legal to send right
    /// now, given what is already queued?
    fn can_issue_now(&self, candidate: State) -> bool {
        let flags = info(candidate).flags;

        if flags.contains(StateFlags::STATECHANGE) {
            if self
                .queue
                .has_state_matching(|s| info(s).flags.contains(StateFlags::STATECHANGE))
            {
                return false;
            }
            let new_login = flags_to_login_state(flags);
            if self
                .queue
                .has_state_matching(|s| info(s).login_state > new_login)
            {
                return false;
            }
            // A SELECTED-requiring command may not overlap a state change
            // into or out of SELECTED.
            if (new_login == LoginState::Selected || self.login_state == LoginState::Selected)
                && self
                    .queue
                    .has_state_matching(|s| info(s).login_state == LoginState::Selected)
            {
                return false;
            }
        } else if self
            .queue
            .has_state_matching(|s| info(s).flags.contains(StateFlags::STATECHANGE))
            && info(candidate).login_state > self.login_state
        {
            return false;
        }

        if flags.contains(StateFlags::MSGSET)
            && self.queue.has_state_matching(|s| {
                let f = info(s).flags;
                f.contains(StateFlags::EXPUNGES) || f.contains(StateFlags::STATECHANGE)
            })
        {
            return false;
        }

        true
    }

    /// `client_plan_send_more_commands` (spec §4.2): while the queue has
    /// room and nothing blocks, keep the lookahead buffer filled and issue
    /// its head. Each non-APPEND candidate is issued immediately (via
    /// `issue_state`, registering it in the command queue) so a later
    /// candidate in the same batch sees it when `can_issue_now` gates
    /// against in-flight commands; APPEND needs driving-task-level control
    /// of the literal upload, so it's reported with no wire text and the
    /// caller drives it separately.
    pub fn plan_send_more_commands(&mut self) -> Vec<(State, Option<String>)> {
        let mut issued = Vec::new();
        loop {
            if self.checkpointing {
                break;
            }
            if self.append_mid_upload {
                break;
            }
            if self.config.no_pipelining && !self.queue.is_empty() {
                break;
            }
            if self.queue.len() >= self.config.max_command_queue_len {
                break;
            }

            self.update_plan();
            let Some(&candidate) = self.plan.front() else {
                break;
            };
            if !self.can_issue_now(candidate) {
                break;
            }

            self.plan.pop_front();

            if candidate == State::Search && self.search_pending {
                // Skip this turn but keep planning past it.
                continue;
            }

            let wire = if candidate == State::Append {
                None
            } else {
                self.issue_state(candidate)
            };
            issued.push((candidate, wire));

            if do_rand(&mut self.rng, info(State::Delay).probability) {
                self.delayed = true;
                break;
            }
        }
        issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UserCredential};
    use std::rc::Rc;

    fn test_client() -> Client {
        let cred = Rc::new(UserCredential {
            username: "u".into(),
            password: "p".into(),
        });
        Client::new(0, cred, Rc::new(Config::default()))
    }

    #[test]
    fn nonauth_plan_picks_authenticate_or_login_only() {
        let mut c = test_client();
        c.update_plan();
        assert_eq!(c.plan.len(), 1);
        let picked = c.plan[0];
        assert!(matches!(picked, State::Authenticate | State::Login));
    }

    #[test]
    fn plan_freezes_once_statechange_buffered() {
        let mut c = test_client();
        c.plan.push_back(State::Login);
        let before = c.plan.clone();
        c.update_plan();
        assert_eq!(c.plan, before);
    }

    #[test]
    fn issue_gating_blocks_statechange_when_one_already_queued() {
        let mut c = test_client();
        c.login_state = LoginState::Auth;
        c.queue.send(
            "SELECT INBOX",
            State::Select,
            None,
            crate::queue::Callback::StateDefault,
        );
        assert!(!c.can_issue_now(State::Select));
    }

    #[test]
    fn issue_gating_blocks_msgset_when_expunges_queued() {
        let mut c = test_client();
        c.login_state = LoginState::Selected;
        c.queue.send(
            "EXPUNGE",
            State::Expunge,
            None,
            crate::queue::Callback::StateDefault,
        );
        assert!(!c.can_issue_now(State::Fetch));
    }

    #[test]
    fn plan_send_more_commands_stops_mid_append_upload() {
        let mut c = test_client();
        c.login_state = LoginState::Selected;
        c.append_mid_upload = true;
        assert!(c.plan_send_more_commands().is_empty());
    }

    #[test]
    fn plan_send_more_commands_respects_no_pipelining() {
        let mut c = test_client();
        c.login_state = LoginState::Selected;
        c.config = Rc::new(Config {
            no_pipelining: true,
            ..Config::default()
        });
        c.queue.send(
            "NOOP",
            State::Noop,
            None,
            crate::queue::Callback::StateDefault,
        );
        assert!(c.plan_send_more_commands().is_empty());
    }
}
