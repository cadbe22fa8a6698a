//! Persistent per-queue message index for a durable message broker.
//!
//! Records, for every message enqueued on a durable queue, whether it has
//! been published, delivered, and/or acknowledged. Message bodies live in
//! a separate store addressed by [`codec::MSG_ID_BYTES`]-byte message ids;
//! this crate only tracks per-queue ordering and state transitions.
//!
//! Module map:
//! - [`codec`]: the bit-packed record formats shared by segment files and
//!   the ack journal.
//! - [`segment`]: append/load/delete for one segment file.
//! - [`journal`]: the shared ack journal and its incremental scatter.
//! - [`state`]: [`IndexState`], the single-slot handle cache, and the
//!   public per-queue operations.
//! - [`recovery`]: [`recovery::init`], the startup reconstruction pipeline.
//! - [`layout`]: directory conventions and queue-name encoding.
//! - [`walker`]: the broker-start hook and its lazy live-message walker.

pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod layout;
pub mod recovery;
pub mod segment;
pub mod state;
pub mod walker;

pub use config::Config;
pub use error::{Error, Result};
pub use recovery::init;
pub use state::{IndexState, QueueEntry};
pub use walker::{broker_start, WalkEntry, Walker};
