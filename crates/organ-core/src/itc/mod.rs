//! Inter-thread communication fabric
//!
//! Typed [`Message`]s travel between fixed [`Endpoint`]s over queues wired
//! once at startup by the [`router`].

pub mod message;
pub mod router;

pub use message::{Endpoint, InterfaceInit, Message, RecomputeRequest, Tag};
pub use router::{Incoming, Mailbox, Outbox, Router, RouterBuilder, RouterError};
