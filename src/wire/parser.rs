//! Minimal response-line tokenizer.
//!
//! Literal `{n}` bodies are assumed already spliced into the line as a
//! quoted string by the transport's line reader (the network I/O layer is
//! itself out of scope per spec §1; it owns reading exactly `n` bytes off
//! the socket and handing this tokenizer a single logical line).

use super::arg::ImapArg;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Untagged,
    Continuation,
    Tagged(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub tag: Tag,
    pub status: Option<Status>,
    pub args: Vec<ImapArg>,
}

/// Parse one logical IMAP response line into a tag plus its argument tree.
///
/// # Errors
/// Returns `Err` with a description if the line has no tag/sigil, or if a
/// parenthesized list or quoted string is left unterminated.
pub fn parse_response_line(line: &str) -> Result<ResponseLine, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.char_indices().peekable();

    let (tag, rest_start) = match chars.peek() {
        Some((_, '*')) => {
            chars.next();
            (Tag::Untagged, skip_ws(line, 1))
        }
        Some((_, '+')) => {
            chars.next();
            (Tag::Continuation, skip_ws(line, 1))
        }
        Some(_) => {
            let end = line.find(' ').ok_or("missing tag terminator")?;
            (Tag::Tagged(line[..end].to_string()), skip_ws(line, end))
        }
        None => return Err("empty response line".to_string()),
    };

    let rest = &line[rest_start..];
    let (status, after_status) = parse_status(rest);
    let args = parse_args(after_status)?;

    Ok(ResponseLine { tag, status, args })
}

fn skip_ws(line: &str, from: usize) -> usize {
    line[from..]
        .char_indices()
        .find(|(_, c)| *c != ' ')
        .map_or(line.len(), |(i, _)| from + i)
}

fn parse_status(rest: &str) -> (Option<Status>, &str) {
    let word_end = rest.find(' ').unwrap_or(rest.len());
    let word = &rest[..word_end];
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Some(Status::Ok),
        "NO" => Some(Status::No),
        "BAD" => Some(Status::Bad),
        "PREAUTH" => Some(Status::PreAuth),
        "BYE" => Some(Status::Bye),
        _ => None,
    };
    match status {
        Some(s) => (Some(s), rest[word_end..].trim_start_matches(' ')),
        None => (None, rest),
    }
}

fn parse_args(mut input: &str) -> Result<Vec<ImapArg>, String> {
    let mut out = Vec::new();
    loop {
        input = input.trim_start_matches(' ');
        if input.is_empty() {
            break;
        }
        let (arg, remainder) = parse_one(input)?;
        out.push(arg);
        input = remainder;
    }
    Ok(out)
}

fn parse_one(input: &str) -> Result<(ImapArg, &str), String> {
    let mut chars = input.chars();
    match chars.next() {
        Some('(') => {
            let mut depth = 1usize;
            let mut idx = 1;
            let bytes = input.as_bytes();
            while idx < bytes.len() && depth > 0 {
                match bytes[idx] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => {}
                }
                idx += 1;
            }
            if depth != 0 {
                return Err("unterminated list".to_string());
            }
            let inner = &input[1..idx - 1];
            let items = parse_args(inner)?;
            Ok((ImapArg::List(items), &input[idx..]))
        }
        Some('"') => {
            let mut idx = 1;
            let bytes = input.as_bytes();
            let mut escaped = false;
            let mut content = String::new();
            loop {
                if idx >= bytes.len() {
                    return Err("unterminated string".to_string());
                }
                let c = bytes[idx] as char;
                if escaped {
                    content.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    idx += 1;
                    break;
                } else {
                    content.push(c);
                }
                idx += 1;
            }
            Ok((ImapArg::Str(content), &input[idx..]))
        }
        Some(_) => {
            let end = input
                .find(|c: char| c == ' ' || c == '(' || c == ')')
                .unwrap_or(input.len());
            let token = &input[..end];
            let arg = if token.eq_ignore_ascii_case("NIL") {
                ImapArg::Nil
            } else {
                ImapArg::Atom(token.to_string())
            };
            Ok((arg, &input[end..]))
        }
        None => Err("expected argument".to_string()),
    }
}
