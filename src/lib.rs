#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP stress-testing and benchmarking client core
//!
//! Drives many concurrent simulated IMAP sessions against a single server,
//! each governed by a per-client command-planning state machine that
//! selects protocol-legal commands, pipelines them, validates server
//! responses against a locally maintained mailbox model, and coordinates
//! checkpoint barriers across clients sharing a mailbox.
//!
//! The wire tokenizer, network I/O, mailbox-source, and SEARCH/SORT/THREAD
//! query text generation are narrow collaborator boundaries ([`wire`],
//! [`transport`], [`source`], [`query`]); everything else here is the core.

pub mod append;
pub mod capabilities;
pub mod catalog;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod planner;
pub mod query;
pub mod queue;
pub mod reply;
pub mod source;
pub mod transport;
pub mod wire;
pub mod world;

pub use client::Client;
pub use config::{Config, ServerConfig, UserCredential};
pub use error::{Error, Result};
pub use world::World;
