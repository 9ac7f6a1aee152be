//! Run configuration
//!
//! Everything the host (CLI, or an embedding caller) can tune before
//! starting a run lives here. Field names follow the "Configuration
//! (enumerated)" list in the design's external-interfaces section so the
//! planner and reply router can refer to them by the same names the spec
//! uses.

use crate::error::{Error, Result};
use std::env;

/// Server connection parameters, loaded the way the teacher's
/// `ImapConfig` was: environment variables with a `.env` fallback,
/// with sane defaults for a local test server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl ServerConfig {
    /// Load server connection parameters from environment variables.
    ///
    /// Reads from `.env` if present. Optional (with defaults):
    /// - `IMAPSTRESS_HOST` (default: `127.0.0.1`)
    /// - `IMAPSTRESS_PORT` (default: `143`)
    /// - `IMAPSTRESS_TLS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAPSTRESS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IMAPSTRESS_PORT")
                .unwrap_or_else(|_| "143".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("invalid IMAPSTRESS_PORT: {e}")))?,
            use_tls: env::var("IMAPSTRESS_TLS").is_ok_and(|v| v == "1" || v == "true"),
        })
    }
}

/// A simulated user's login credentials, shared by reference among every
/// client driven as that user (spec §3: "a pointer to the shared user
/// credential record").
#[derive(Debug, Clone)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

/// Run-wide behavioral knobs. Every field here is named in spec §6
/// ("Configuration (enumerated)").
#[derive(Debug, Clone)]
pub struct Config {
    /// Target number of concurrently simulated clients.
    pub clients_count: u32,
    /// APPEND stops generating new messages once the mailbox holds this
    /// many (0 = unbounded).
    pub message_count_threshold: u32,
    /// Pick the next planner state uniformly at random instead of
    /// advancing sequentially through the catalog.
    pub random_states: bool,
    /// Negotiate QRESYNC on SELECT when the server advertises it.
    pub qresync: bool,
    /// Disable command pipelining: never have more than one command
    /// in flight per client.
    pub no_pipelining: bool,
    /// Disable local model bookkeeping used only to detect server bugs
    /// (currently: UIDVALIDITY-change detection).
    pub no_tracking: bool,
    /// Wall-clock seconds between checkpoint barriers (0 disables).
    pub checkpoint_interval_secs: u64,
    /// Destination mailbox name used by the COPY planner state.
    pub copy_dest: String,
    /// Mailbox name every client SELECTs.
    pub mailbox: String,
    /// SASL PLAIN master user, for proxy auth (`master_user\0user\0pass`).
    pub master_user: Option<String>,
    /// Let the STORE verifier assign exclusive per-flag ownership so it
    /// can require the server to apply every STORE it acknowledges.
    pub assign_flag_owners: bool,
    /// Assign exclusive per-message ownership so two clients never race
    /// on the same UID.
    pub assign_msg_owners: bool,
    /// Synthesize a `CREATE "<mailbox>"` on SELECT/STATUS/APPEND/COPY `NO`
    /// instead of treating the missing mailbox as a failure.
    pub try_create_mailbox: bool,
    /// Maximum number of commands a single client may have queued.
    pub max_command_queue_len: usize,
    /// Upper bound, in milliseconds, on a cooperative `DELAY` sleep.
    pub delay_msecs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clients_count: 10,
            message_count_threshold: 0,
            random_states: true,
            qresync: false,
            no_pipelining: false,
            no_tracking: false,
            checkpoint_interval_secs: 0,
            copy_dest: "Archive".to_string(),
            mailbox: "INBOX".to_string(),
            master_user: None,
            assign_flag_owners: false,
            assign_msg_owners: false,
            try_create_mailbox: true,
            max_command_queue_len: 12,
            delay_msecs: 1000,
        }
    }
}
