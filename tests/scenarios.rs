//! End-to-end scenarios driving [`imapstress::Client`] against synthetic
//! server replies, without a real socket. Each test plays both sides: it
//! calls the issuing methods to get wire text, then feeds back hand-written
//! response lines through the same parser/router the driving task uses.

use std::rc::Rc;

use imapstress::catalog::{LoginState, State};
use imapstress::client::Client;
use imapstress::config::{Config, UserCredential};
use imapstress::mailbox::storage::StorageRegistry;
use imapstress::mailbox::{FlagchangeDirty, MailFlags, MailboxView};
use imapstress::queue::Callback;
use imapstress::wire::parser::parse_response_line;

fn client_with(config: Config) -> Client {
    let cred = Rc::new(UserCredential {
        username: "alice".into(),
        password: "s3cret".into(),
    });
    Client::new(0, cred, Rc::new(config))
}

/// Drives LOGIN then SELECT to completion the way the binary's driving loop
/// does: `handle_tagged` never creates the view itself, so the caller wires
/// one up from a registry once SELECT reports success.
fn login_and_select(c: &mut Client, reg: &mut StorageRegistry) {
    let wire = c.issue_state(State::Login).unwrap();
    assert!(wire.starts_with("1 LOGIN"));
    let reply = parse_response_line("1 OK LOGIN completed").unwrap();
    let effect = c.handle_tagged(&reply);
    assert!(effect.spawn_more_clients);
    assert_eq!(c.login_state, LoginState::Auth);

    let wire = c.issue_state(State::Select).unwrap();
    assert!(wire.starts_with("2 SELECT"));
    let reply = parse_response_line("2 OK [READ-WRITE] SELECT completed").unwrap();
    let effect = c.handle_tagged(&reply);
    assert!(effect.failure.is_none());
    assert_eq!(c.login_state, LoginState::Selected);
    c.view = Some(MailboxView::new(reg.get_or_create(&c.config.mailbox)));
}

/// Scenario 1: LOGIN, SELECT, FETCH 1:* FLAGS, LOGOUT against a mailbox of
/// 3 messages already `\Seen`. Asserts the view ends up with the exact
/// UIDs the server is modeled as holding and a clean dirty state.
#[test]
fn login_select_fetch_reports_seen_flags() {
    let mut reg = StorageRegistry::new();
    let mut c = client_with(Config {
        random_states: false,
        ..Config::default()
    });

    login_and_select(&mut c, &mut reg);

    // Seed the mailbox the way a real EXISTS/FETCH exchange that precedes
    // our own FETCH would have: three known UIDs, none yet flagged.
    {
        let view = c.view.as_mut().unwrap();
        view.push_known(10);
        view.push_known(20);
        view.push_known(30);
    }

    let wire = c.issue_state(State::Fetch).unwrap();
    assert!(wire.contains("FETCH 1:3 (FLAGS)"));

    for seq in 1..=3u32 {
        let line = parse_response_line(&format!("* {seq} FETCH (FLAGS (\\Seen))")).unwrap();
        c.handle_untagged(&line);
    }
    let reply = parse_response_line("3 OK FETCH completed").unwrap();
    let effect = c.handle_tagged(&reply);
    assert!(effect.failure.is_none());

    let view = c.view.as_ref().unwrap();
    assert_eq!(
        (1..=3).filter_map(|s| view.uid_at_seq(s)).collect::<Vec<_>>(),
        vec![10, 20, 30]
    );
    for seq in 1..=3u32 {
        let meta = view.metadata_at_seq(seq).unwrap();
        assert!(meta.mail_flags.unwrap().contains(MailFlags::SEEN));
        assert_eq!(meta.dirty, FlagchangeDirty::No);
    }

    let wire = c.issue_state(State::Logout).unwrap();
    assert!(wire.contains("LOGOUT"));
    let reply = parse_response_line("4 OK LOGOUT completed").unwrap();
    c.handle_untagged(&parse_response_line("* BYE logging out").unwrap());
    let effect = c.handle_tagged(&reply);
    assert!(!effect.fatal);
    assert_eq!(c.login_state, LoginState::NonAuth);
}

/// Scenario 2: STORE +FLAGS (\Flagged), with the server acknowledging the
/// tagged STORE but never sending an untagged FETCH FLAGS confirmation for
/// one of the addressed messages. STORE Verification (`reply::finish_store`)
/// must flag exactly that message, per `store_verify_seq`'s
/// `"STORE didn't return FETCH FLAGS for seq %u"` case.
#[test]
fn store_verification_catches_unapplied_flag_change() {
    let mut reg = StorageRegistry::new();
    let mut c = client_with(Config {
        random_states: false,
        assign_flag_owners: true,
        ..Config::default()
    });
    login_and_select(&mut c, &mut reg);
    {
        let view = c.view.as_mut().unwrap();
        view.push_known(10);
        view.push_known(20);
        view.push_known(30);
        for seq in 1..=3u32 {
            view.record_fetch_flags(seq, MailFlags::SEEN, &[]);
        }
    }

    let wire = c.issue_state(State::Store).unwrap();
    assert!(wire.contains("STORE 1:3 +FLAGS (\\Flagged)"));

    // seq 1 and 2 confirm the flag landed; seq 3 gets no FETCH at all, so
    // its confirmation never arrives before the tagged STORE completes.
    let line = parse_response_line("* 1 FETCH (FLAGS (\\Seen \\Flagged))").unwrap();
    c.handle_untagged(&line);
    let line = parse_response_line("* 2 FETCH (FLAGS (\\Seen \\Flagged))").unwrap();
    c.handle_untagged(&line);

    let reply = parse_response_line("3 OK STORE completed").unwrap();
    let effect = c.handle_tagged(&reply);

    let failure = effect.failure.expect("missing FETCH confirmation should be reported");
    assert!(failure.contains("seq 3"));
}

/// Scenario 3: with LITERAL+ and MULTIAPPEND negotiated, the APPEND driver
/// should produce one continuation-free opening slice, and once the
/// planner still has another APPEND queued, a chained follow-on slice
/// closes with a bare `\r\n` (mirroring `queue_append`'s binary-side loop).
#[test]
fn multiappend_with_literal_plus_chains_without_continuation() {
    use imapstress::capabilities::Capabilities;
    use imapstress::source::SyntheticSource;

    let mut c = client_with(Config::default());
    c.login_state = LoginState::Selected;
    c.capabilities = Capabilities::LITERAL_PLUS | Capabilities::MULTIAPPEND;
    c.plan.push_back(State::Append);

    let mut source = SyntheticSource::new();
    let opening = c.build_append_slice(&mut source, false);
    assert!(!opening.needs_continuation);
    assert!(opening.prefix.starts_with("APPEND \"INBOX\""));
    assert!(opening.prefix.contains("+}"));
    c.append_slice_written();

    assert!(c.append_should_chain());
    let chained = c.build_append_slice(&mut source, true);
    assert!(chained.prefix.starts_with(" (\\Seen)"));
    assert!(!chained.needs_continuation);
    c.append_slice_written();

    c.plan.clear();
    assert!(!c.append_should_chain());
    c.append_finish();
    assert!(!c.append_unfinished);
    assert!(!c.append_mid_upload);
}

/// Scenario 4: COPY against a missing mailbox gets `NO [TRYCREATE]`; the
/// router hands back a CREATE follow-up, and re-issuing COPY afterward
/// succeeds.
#[test]
fn copy_trycreate_recovers_with_create_then_retry() {
    let mut reg = StorageRegistry::new();
    let mut c = client_with(Config {
        copy_dest: "Archive".into(),
        ..Config::default()
    });
    login_and_select(&mut c, &mut reg);
    c.view.as_mut().unwrap().push_known(10);

    let wire = c.issue_state(State::Copy).unwrap();
    assert!(wire.contains("COPY 1:1 \"Archive\""));
    let reply = parse_response_line("3 NO [TRYCREATE] no such mailbox").unwrap();
    let effect = c.handle_tagged(&reply);
    assert_eq!(effect.follow_up.as_deref(), Some("CREATE \"Archive\"\r\n"));

    let (_, create_wire) = c.queue.send("CREATE \"Archive\"", State::MCreate, None, Callback::StateDefault);
    assert_eq!(create_wire, "4 CREATE \"Archive\"\r\n");
    let reply = parse_response_line("4 OK CREATE completed").unwrap();
    let effect = c.handle_tagged(&reply);
    assert!(effect.failure.is_none());

    let wire = c.issue_state(State::Copy).unwrap();
    assert!(wire.contains("COPY 1:1 \"Archive\""));
    let reply = parse_response_line("5 OK COPY completed").unwrap();
    let effect = c.handle_tagged(&reply);
    assert!(effect.failure.is_none());
}

/// Scenario 5: a UIDVALIDITY change between two SELECTs on the same
/// mailbox storage is detected and the storage's value is updated to the
/// new one (tracking is on by default).
#[test]
fn uidvalidity_change_between_selects_updates_storage() {
    let mut reg = StorageRegistry::new();
    let mut c = client_with(Config::default());
    login_and_select(&mut c, &mut reg);

    let first = parse_response_line("* OK [UIDVALIDITY 1000] ok").unwrap();
    c.handle_untagged(&first);
    assert_eq!(c.view.as_ref().unwrap().storage.borrow().uidvalidity, 1000);

    // Client disconnects and a fresh SELECT against the same storage
    // reports a different UIDVALIDITY.
    c.login_state = LoginState::Auth;
    let wire = c.issue_state(State::Select).unwrap();
    assert!(wire.starts_with("3 SELECT"));
    let reply = parse_response_line("3 OK [READ-WRITE] SELECT completed").unwrap();
    c.handle_tagged(&reply);
    c.login_state = LoginState::Selected;

    let second = parse_response_line("* OK [UIDVALIDITY 2000] ok").unwrap();
    c.handle_untagged(&second);
    assert_eq!(c.view.as_ref().unwrap().storage.borrow().uidvalidity, 2000);
}

/// Scenario 6: pipelining guard. With STORE (a `MSGSET` state) and SELECT
/// (a `STATECHANGE` state touching SELECTED) both queued in the lookahead
/// buffer, only STORE may be issued this round; SELECT stays buffered
/// until STORE's reply clears the in-flight overlap.
#[test]
fn pipelining_guard_blocks_statechange_behind_msgset() {
    let mut reg = StorageRegistry::new();
    let mut c = client_with(Config {
        random_states: false,
        ..Config::default()
    });
    login_and_select(&mut c, &mut reg);
    c.view.as_mut().unwrap().push_known(10);

    c.plan.clear();
    c.plan.push_back(State::Store);
    c.plan.push_back(State::Select);

    let issued = c.plan_send_more_commands();
    let states: Vec<State> = issued.iter().map(|(s, _)| *s).collect();
    assert_eq!(states, vec![State::Store]);
    assert_eq!(c.queue.len(), 1);
    assert_eq!(c.plan.front(), Some(&State::Select));

    let reply = parse_response_line("3 OK STORE completed").unwrap();
    c.handle_tagged(&reply);

    let issued = c.plan_send_more_commands();
    let states: Vec<State> = issued.iter().map(|(s, _)| *s).collect();
    assert_eq!(states, vec![State::Select]);
}
