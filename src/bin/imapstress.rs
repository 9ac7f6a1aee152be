#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI driver for the IMAP stress-testing core.
//!
//! Runs everything on one cooperative, single-threaded `LocalSet` (spec
//! §5): one task per simulated client, sharing a `Rc<RefCell<World>>`, plus
//! a checkpoint-barrier task when `--checkpoint-interval-secs` is nonzero.

use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::task::LocalSet;
use tokio_rustls::TlsStream;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use imapstress::catalog::State;
use imapstress::checkpoint::{verify_cross_client, CheckpointState};
use imapstress::config::{Config, ServerConfig, UserCredential};
use imapstress::queue::Callback;
use imapstress::source::SyntheticSource;
use imapstress::transport::{self, LineReader};
use imapstress::wire::parser::{parse_response_line, Tag};
use imapstress::World;

#[derive(Parser)]
#[command(name = "imapstress")]
#[command(about = "Concurrent IMAP stress-testing and benchmarking client")]
struct Args {
    /// Username to authenticate with
    #[arg(long, env = "IMAPSTRESS_USER")]
    user: String,
    /// Password to authenticate with
    #[arg(long, env = "IMAPSTRESS_PASS")]
    pass: String,

    /// Target number of concurrently simulated clients
    #[arg(long, default_value_t = 10)]
    clients: u32,

    /// Mailbox every client SELECTs
    #[arg(long, default_value = "INBOX")]
    mailbox: String,

    /// COPY destination mailbox
    #[arg(long, default_value = "Archive")]
    copy_dest: String,

    /// Pick the planner's next state uniformly at random instead of
    /// advancing sequentially through the catalog
    #[arg(long)]
    random_states: bool,

    /// Never have more than one command in flight per client
    #[arg(long)]
    no_pipelining: bool,

    /// Disable UIDVALIDITY-change detection
    #[arg(long)]
    no_tracking: bool,

    /// Treat a missing mailbox as a hard failure instead of synthesizing
    /// CREATE on SELECT/STATUS/APPEND/COPY NO
    #[arg(long)]
    no_try_create_mailbox: bool,

    /// Negotiate QRESYNC on SELECT when the server advertises it
    #[arg(long)]
    qresync: bool,

    /// Wall-clock seconds between checkpoint barriers (0 disables)
    #[arg(long, default_value_t = 0)]
    checkpoint_interval_secs: u64,

    /// Require the server to apply every STORE it acknowledges
    #[arg(long)]
    assign_flag_owners: bool,

    /// Assign exclusive per-message ownership across clients
    #[arg(long)]
    assign_msg_owners: bool,

    /// Maximum number of commands a single client may have queued
    #[arg(long, default_value_t = 12)]
    max_command_queue_len: usize,

    /// Upper bound, in milliseconds, on a cooperative DELAY sleep
    #[arg(long, default_value_t = 1000)]
    delay_msecs: u64,

    /// APPEND stops generating new messages once the mailbox holds this
    /// many (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    message_count_threshold: u32,
}

/// One concrete transport: either plaintext or a completed STARTTLS
/// handshake. [`imapstress::transport::Transport`] is implemented for
/// anything `AsyncRead + AsyncWrite + Unpin`, so this just needs to forward
/// polls to whichever variant is live.
enum Conn {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

async fn connect_for(server: &ServerConfig) -> imapstress::Result<Conn> {
    if server.use_tls {
        let tls = transport::connect_starttls(&server.host, server.port).await?;
        Ok(Conn::Tls(Box::new(tls)))
    } else {
        Ok(Conn::Plain(transport::connect_plain(&server.host, server.port).await?))
    }
}

fn spawn_driving_task(world: &Rc<RefCell<World>>, idx: usize, server: ServerConfig) {
    let world = Rc::clone(world);
    tokio::task::spawn_local(async move {
        if let Err(e) = drive_client(world, idx, server).await {
            warn!(client = idx, error = %e, "client session ended");
        }
    });
}

/// One simulated client's whole lifetime: connect, greet, then alternate
/// between letting the planner fill the command queue and folding the next
/// server reply back into the model, until LOGOUT/BYE or a fatal error.
async fn drive_client(world: Rc<RefCell<World>>, idx: usize, server: ServerConfig) -> imapstress::Result<()> {
    let conn = connect_for(&server).await?;
    let mut reader = LineReader::new(conn);
    let mut source = SyntheticSource::new();
    // Body bytes staged for an APPEND literal still awaiting the server's
    // `+` continuation (non-`LITERAL+` path only).
    let mut pending_append_body: Option<Vec<u8>> = None;

    let greeting = reader.read_logical_line().await?;
    debug!(client = idx, %greeting, "server greeting");

    loop {
        let mut to_write: Vec<Vec<u8>> = Vec::new();
        let mut delay_msecs = None;
        let mut done = false;

        {
            let mut w = world.borrow_mut();
            if w.clients[idx].seen_bye {
                done = true;
            } else {
                let issued = w.clients[idx].plan_send_more_commands();
                for (state, wire) in issued {
                    w.record_issued(state);
                    if state == State::Append {
                        let threshold = w.config.message_count_threshold;
                        let at_threshold = threshold > 0
                            && w.clients[idx].view.as_ref().is_some_and(|v| v.len() as u32 >= threshold);
                        if !at_threshold {
                            pending_append_body = queue_append(&mut w, idx, &mut source, &mut to_write);
                        }
                    } else if let Some(wire) = wire {
                        to_write.push(wire.into_bytes());
                    }
                }
                if w.clients[idx].delayed {
                    delay_msecs = Some(w.config.delay_msecs);
                    w.clients[idx].delayed = false;
                }
            }
        }

        if done {
            return Ok(());
        }

        for bytes in &to_write {
            reader.write_all(bytes).await?;
        }
        if let Some(msecs) = delay_msecs {
            tokio::time::sleep(Duration::from_millis(msecs)).await;
        }

        let line = reader.read_logical_line().await?;
        let parsed = match parse_response_line(&line) {
            Ok(p) => p,
            Err(e) => {
                warn!(client = idx, error = %e, raw = %line, "unparseable response line");
                continue;
            }
        };

        let mut spawn_range = None;
        let mut follow_up_wire = None;
        let mut fatal = false;

        {
            let mut w = world.borrow_mut();
            match &parsed.tag {
                Tag::Untagged => w.clients[idx].handle_untagged(&parsed),
                Tag::Continuation => {
                    if let Some(body) = pending_append_body.take() {
                        let client = &mut w.clients[idx];
                        let chained = client.append_should_chain();
                        client.append_slice_written();
                        drop(w);
                        reader.write_all(&body).await?;
                        if chained {
                            let mut w = world.borrow_mut();
                            let client = &mut w.clients[idx];
                            let chain = client.build_append_slice(&mut source, true);
                            drop(w);
                            reader.write_all(chain.prefix.as_bytes()).await?;
                            if chain.needs_continuation {
                                pending_append_body = Some(chain.body);
                            } else {
                                reader.write_all(&chain.body).await?;
                                let mut w = world.borrow_mut();
                                w.clients[idx].append_slice_written();
                                w.clients[idx].append_finish();
                                drop(w);
                                reader.write_all(b"\r\n").await?;
                            }
                        } else {
                            let mut w = world.borrow_mut();
                            w.clients[idx].append_finish();
                            drop(w);
                            reader.write_all(b"\r\n").await?;
                        }
                        continue;
                    }
                }
                Tag::Tagged(_) => {
                    let effect = w.clients[idx].handle_tagged(&parsed);
                    if w.clients[idx].is_selected() && w.clients[idx].view.is_none() {
                        let mailbox = w.clients[idx].config.mailbox.clone();
                        let storage = w.storages.get_or_create(&mailbox);
                        w.clients[idx].view = Some(imapstress::mailbox::MailboxView::new(storage));
                    }
                    if let Some(message) = &effect.failure {
                        w.record_failure(message);
                    }
                    if effect.spawn_more_clients {
                        let before = w.clients.len();
                        w.spawn_up_to(3);
                        if w.clients.len() > before {
                            spawn_range = Some(before..w.clients.len());
                        }
                    }
                    if let Some(text) = effect.follow_up {
                        let cmd_text = text.trim_end_matches("\r\n").to_string();
                        let (_, wire) =
                            w.clients[idx]
                                .queue
                                .send(&cmd_text, State::MCreate, None, Callback::StateDefault);
                        follow_up_wire = Some(wire);
                    }
                    fatal = effect.fatal;
                    if fatal {
                        w.clients[idx].disconnect();
                    }
                }
            }
        }

        if let Some(range) = spawn_range {
            for new_idx in range {
                spawn_driving_task(&world, new_idx, server.clone());
            }
        }
        if let Some(wire) = follow_up_wire {
            reader.write_all(wire.as_bytes()).await?;
            continue;
        }
        if fatal {
            return Ok(());
        }
    }
}

/// Build and register the opening slice of an APPEND command, writing out
/// the tagged command text plus body immediately when `LITERAL+` is
/// available, or returning the body to stage for once the server's `+`
/// continuation arrives otherwise.
fn queue_append(
    world: &mut std::cell::RefMut<'_, World>,
    idx: usize,
    source: &mut SyntheticSource,
    to_write: &mut Vec<Vec<u8>>,
) -> Option<Vec<u8>> {
    let client = &mut world.clients[idx];
    let slice = client.build_append_slice(source, false);
    let prefix_line = slice.prefix.trim_end_matches("\r\n").to_string();
    let (_, wire) = client.queue.send(&prefix_line, State::Append, None, Callback::Append);
    to_write.push(wire.into_bytes());

    if slice.needs_continuation {
        // Body follows once the server's `+` continuation arrives; see the
        // `Tag::Continuation` branch in `drive_client`.
        return Some(slice.body);
    }

    to_write.push(slice.body);
    client.append_slice_written();
    while client.append_should_chain() {
        let chain = client.build_append_slice(source, true);
        to_write.push(chain.prefix.into_bytes());
        to_write.push(chain.body);
        client.append_slice_written();
    }
    client.append_finish();
    to_write.push(b"\r\n".to_vec());
    None
}

/// Periodically opens a checkpoint barrier (spec §4.7) across every
/// currently-selected client sharing the configured mailbox, polling until
/// all participants quiesce, then runs the P7 cross-client agreement check.
async fn run_checkpoint_loop(world: Rc<RefCell<World>>) {
    loop {
        let interval = world.borrow().config.checkpoint_interval_secs;
        if interval == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;

        let mailbox = world.borrow().config.mailbox.clone();
        let participants: Vec<usize> = world
            .borrow()
            .clients
            .iter()
            .filter(|c| c.is_selected())
            .map(|c| c.idx)
            .collect();
        if participants.len() < 2 {
            continue;
        }

        let storage = world.borrow_mut().storages.get_or_create(&mailbox);
        let mut state = CheckpointState::begin(&storage, participants.iter().copied());
        for &idx in &participants {
            world.borrow_mut().clients[idx].checkpointing = true;
        }

        loop {
            tokio::task::yield_now().await;
            {
                let mut w = world.borrow_mut();
                for &idx in &participants {
                    w.clients[idx].poll_checkpoint(&mut state);
                }
            }
            if state.all_quiesced() {
                break;
            }
        }

        let failures = {
            let w = world.borrow();
            let views: Vec<_> = participants.iter().filter_map(|&idx| w.clients[idx].view.as_ref()).collect();
            verify_cross_client(&views)
        };
        if !failures.is_empty() {
            let mut w = world.borrow_mut();
            for failure in &failures {
                w.record_failure(failure);
            }
        }

        state.finish(&storage);
        let mut w = world.borrow_mut();
        for &idx in &participants {
            w.clients[idx].checkpointing = false;
        }
    }
}

async fn run(server: ServerConfig, config: Config, credential: UserCredential) -> anyhow::Result<()> {
    let world = Rc::new(RefCell::new(World::new(config, credential)));
    world.borrow_mut().spawn_client();
    spawn_driving_task(&world, 0, server.clone());

    tokio::task::spawn_local(run_checkpoint_loop(Rc::clone(&world)));

    // Keep the local set alive until every client task has exited; the
    // simplest way without a join-handle registry is to poll for an empty
    // live client set going quiet, which in practice means waiting on the
    // ctrl-c signal for a long-running stress run.
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let server = ServerConfig::from_env()?;
    let config = Config {
        clients_count: args.clients,
        message_count_threshold: args.message_count_threshold,
        random_states: args.random_states,
        qresync: args.qresync,
        no_pipelining: args.no_pipelining,
        no_tracking: args.no_tracking,
        checkpoint_interval_secs: args.checkpoint_interval_secs,
        copy_dest: args.copy_dest,
        mailbox: args.mailbox,
        master_user: None,
        assign_flag_owners: args.assign_flag_owners,
        assign_msg_owners: args.assign_msg_owners,
        try_create_mailbox: !args.no_try_create_mailbox,
        max_command_queue_len: args.max_command_queue_len,
        delay_msecs: args.delay_msecs,
    };
    let credential = UserCredential {
        username: args.user,
        password: args.pass,
    };

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = LocalSet::new();
    local.block_on(&runtime, run(server, config, credential))
}
