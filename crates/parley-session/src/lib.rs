//! Per-connection protocol engine for Parley.
//!
//! A [`Session`] owns one line channel and drives a client from email prompt
//! to dashboard and through its sub-flows. Friend invitations go through the
//! [`RelationshipWorkflow`]; chats spawn a [`ChatPoller`] for the lifetime of
//! the chat screen.

pub mod auth;
pub mod channel;
mod chat;
pub mod error;
mod invitations;
pub mod menu;
pub mod poller;
mod profile;
pub mod session;
pub mod store;
pub mod workflow;

pub use channel::{LineChannel, LineWriter};
pub use error::{SessionError, WorkflowError};
pub use poller::{ChatPoller, PollerHandle};
pub use session::{Session, SessionSettings};
pub use store::Store;
pub use workflow::RelationshipWorkflow;
