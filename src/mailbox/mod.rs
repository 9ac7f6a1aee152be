//! Mailbox Storage + Mailbox View (spec §3, §4.3).

pub mod keyword;
pub mod storage;
pub mod view;

pub use keyword::KeywordRegistry;
pub use storage::{MailboxStorage, MessageGlobal, MessageMetadataStatic, StorageRegistry};
pub use view::{DynamicMetadata, FlagchangeDirty, MailFlags, MailboxView, SeqRange};
