//! Structured-argument interface (spec §6).
//!
//! This is the boundary the design calls "the wire-format tokenizer/parser
//! producing structured argument trees" and deliberately keeps out of the
//! core planner/model/router logic. [`ImapArg`] and its three accessors
//! are the entire surface the core is allowed to depend on; `parser`
//! contains the tokenizer that produces them from raw response bytes.

pub mod arg;
pub mod parser;
pub mod tag;

pub use arg::{imap_arg_atom_equals, imap_arg_get_atom, imap_args_to_str, ImapArg};
pub use parser::{parse_response_line, ResponseLine};
