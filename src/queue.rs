//! Command Queue (spec §4.4).
//!
//! Each queued command holds the exact issued text, its assigned tag, the
//! originating [`State`], an optional bound sequence range (the message
//! set for `MSGSET` commands — needed for precise reply accounting in
//! §4.6), and a callback tag the reply router dispatches on.

use crate::catalog::State;
use crate::mailbox::SeqRange;
use crate::wire::tag::TagGenerator;

/// What the reply router should do once this command's tagged reply
/// arrives. Kept as a plain enum rather than a boxed closure: every
/// variant the planner can emit is known up front, and a closure would
/// have to capture `Rc<RefCell<_>>` state by reference anyway (spec §5:
/// single-threaded cooperative model, no `Send` requirement, but still
/// awkward to store safely alongside the command itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Ordinary completion: run the state's default tagged-reply handling.
    StateDefault,
    /// STORE/STORE_DEL: remembers enough of the issued command text to
    /// verify the server applied it (spec §4.6 STORE Verification).
    Store { op: StoreOp, flags_text: String, silent: bool },
    /// APPEND: drives the literal upload / MULTIAPPEND continuation.
    Append,
    /// COPY: remembers the destination so `[TRYCREATE]` can be retried.
    Copy { dest: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Add,
    Remove,
    Replace,
}

/// A command sent but not yet fully replied to.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub tag: String,
    pub text: String,
    pub state: State,
    pub seq_range: Option<SeqRange>,
    pub callback: Callback,
}

/// Per-client in-flight command list (spec §4.4).
#[derive(Debug, Default)]
pub struct CommandQueue {
    tags: TagGenerator,
    commands: Vec<QueuedCommand>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tags: TagGenerator::new(),
            commands: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.commands.iter()
    }

    /// `command_send`: allocate a tag, append the command, and return the
    /// exact wire bytes (`"<tag> <text>\r\n"`) for the transport to write.
    pub fn send(
        &mut self,
        text: &str,
        state: State,
        seq_range: Option<SeqRange>,
        callback: Callback,
    ) -> (String, String) {
        let tag = self.tags.next_tag();
        let wire = format!("{tag} {text}\r\n");
        self.commands.push(QueuedCommand {
            tag: tag.clone(),
            text: text.to_string(),
            state,
            seq_range,
            callback,
        });
        (tag, wire)
    }

    /// Remove and return the command matching `tag` (a tagged reply just
    /// arrived for it).
    pub fn take(&mut self, tag: &str) -> Option<QueuedCommand> {
        let idx = self.commands.iter().position(|c| c.tag == tag)?;
        Some(self.commands.remove(idx))
    }

    #[must_use]
    pub fn peek(&self, tag: &str) -> Option<&QueuedCommand> {
        self.commands.iter().find(|c| c.tag == tag)
    }

    /// Abort every in-flight command (spec §5: `client_disconnect`).
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    #[must_use]
    pub fn has_state_matching(&self, pred: impl Fn(State) -> bool) -> bool {
        self.commands.iter().any(|c| pred(c.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_allocates_increasing_tags() {
        let mut q = CommandQueue::new();
        let (tag1, wire1) = q.send("NOOP", State::Noop, None, Callback::StateDefault);
        let (tag2, _) = q.send("NOOP", State::Noop, None, Callback::StateDefault);
        assert_eq!(tag1, "1");
        assert_eq!(tag2, "2");
        assert_eq!(wire1, "1 NOOP\r\n");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn take_removes_by_tag() {
        let mut q = CommandQueue::new();
        q.send("NOOP", State::Noop, None, Callback::StateDefault);
        let taken = q.take("1").unwrap();
        assert_eq!(taken.state, State::Noop);
        assert!(q.is_empty());
        assert!(q.take("1").is_none());
    }
}
