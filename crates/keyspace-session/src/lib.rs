//! Session core for Keyspace.
//!
//! This crate owns everything a client session keeps between messages:
//!
//! 1. **Declarations**: resource ids, subscriptions, queryables, and
//!    publishers ([`SessionState`])
//! 2. **Pending queries**: reply collection, consolidation, and completion
//!    ([`QueryEnd`], [`QueryOutcome`])
//! 3. **Dispatch**: applying router messages and running the callbacks they
//!    trigger ([`Dispatcher`])
//!
//! # How it fits in the stack
//!
//! ```text
//! API Layer (above)  ← Session handle, spawns reader/writer tasks
//!     ↕
//! Session Layer (this crate)  ← state tables, routing, query bookkeeping
//!     ↕
//! Protocol Layer (below)  ← Message, KeyExpr, codec
//! ```
//!
//! Nothing here touches a link. The runtime above feeds frames in and drains
//! outgoing messages from the writer queue.

mod dispatcher;
mod error;
mod query;
mod sample;
mod state;

pub use dispatcher::{Dispatcher, Outbound};
pub use error::SessionError;
pub use query::{QueryEnd, QueryOutcome};
pub use sample::{
    DataCallback, Query, QueryCallback, Reply, ReplyCallback, Sample,
};
pub use state::{Invocation, SessionState};
