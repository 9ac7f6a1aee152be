//! `ImapArg`: the structured-argument tree named in spec §6.
//!
//! Five variants, matching the dovecot-derived interface the design
//! mandates: an atom (bare token), a quoted/literal string, a binary
//! literal, a parenthesized list, and `NIL`.

/// A single parsed IMAP argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapArg {
    Atom(String),
    Str(String),
    Literal(Vec<u8>),
    List(Vec<ImapArg>),
    Nil,
}

impl ImapArg {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Atom(s) | Self::Str(s) => Some(s.as_str()),
            Self::Literal(bytes) => std::str::from_utf8(bytes).ok(),
            Self::List(_) | Self::Nil => None,
        }
    }
}

/// `imap_arg_get_atom`: returns the atom text of the first element of
/// `args`, or `None` if it isn't an atom.
#[must_use]
pub fn imap_arg_get_atom(args: &[ImapArg]) -> Option<&str> {
    match args.first() {
        Some(ImapArg::Atom(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// `imap_args_to_str`: renders an argument list back to its textual form,
/// space-separated, the way the original response line read (lists keep
/// their parentheses, strings their quotes are dropped since they're only
/// used for comparison/logging here).
#[must_use]
pub fn imap_args_to_str(args: &[ImapArg]) -> String {
    args.iter()
        .map(render_one)
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_one(arg: &ImapArg) -> String {
    match arg {
        ImapArg::Atom(s) | ImapArg::Str(s) => s.clone(),
        ImapArg::Literal(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ImapArg::List(items) => format!(
            "({})",
            items.iter().map(render_one).collect::<Vec<_>>().join(" ")
        ),
        ImapArg::Nil => "NIL".to_string(),
    }
}

/// `imap_arg_atom_equals`: case-insensitive comparison of the first
/// argument's atom text against `text`, used for things like
/// `[TRYCREATE]` response-code matching.
#[must_use]
pub fn imap_arg_atom_equals(args: &[ImapArg], text: &str) -> bool {
    imap_arg_get_atom(args).is_some_and(|atom| atom.eq_ignore_ascii_case(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_atom_matches_first_element() {
        let args = vec![ImapArg::Atom("OK".into()), ImapArg::Str("done".into())];
        assert_eq!(imap_arg_get_atom(&args), Some("OK"));
    }

    #[test]
    fn get_atom_rejects_non_atom() {
        let args = vec![ImapArg::Str("OK".into())];
        assert_eq!(imap_arg_get_atom(&args), None);
    }

    #[test]
    fn atom_equals_is_case_insensitive() {
        let args = vec![ImapArg::Atom("[TRYCREATE]".into())];
        assert!(imap_arg_atom_equals(&args, "[trycreate]"));
    }

    #[test]
    fn args_to_str_renders_lists() {
        let args = vec![ImapArg::List(vec![
            ImapArg::Atom("\\Seen".into()),
            ImapArg::Atom("\\Flagged".into()),
        ])];
        assert_eq!(imap_args_to_str(&args), "(\\Seen \\Flagged)");
    }
}
