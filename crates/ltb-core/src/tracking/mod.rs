//! Link tracking: the tracking command, the click transaction, and the storage port.

pub mod clicks;
pub mod command;
pub mod locks;
pub mod memory;
pub mod render;
pub mod store;

pub use clicks::{ClickEngine, ClickOutcome};
pub use command::{CommandHandler, CommandOutcome};
pub use locks::{LinkLocks, StagedWrite, TxScope};
pub use memory::MemoryLinkStore;
pub use store::{LinkStore, LinkTransaction, TransactionBody};
