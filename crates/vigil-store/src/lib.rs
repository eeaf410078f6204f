pub mod audit;
pub mod channel;
pub mod envelope;
pub mod error;
pub mod hot;
pub mod hub;
pub mod memory;
pub mod sqlite;

pub use audit::{AuditSink, NullAudit, SqliteAuditLog};
pub use channel::{subscribe_with, StateChannel};
pub use envelope::{get_or_else, get_typed, publish_typed, set_typed, Envelope, StatePayload};
pub use error::StateError;
pub use memory::MemoryStateChannel;
pub use sqlite::{SqliteLocation, SqliteStateChannel};
