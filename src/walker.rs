//! Broker-start hook: classify on-disk queue directories against the
//! durable-queue set, purge transient ones, and hand the message-body
//! store a lazy, restartable walker over every surviving live message.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use crate::codec::MSG_ID_BYTES;
use crate::config::Config;
use crate::error::Result;
use crate::layout;
use crate::recovery;
use crate::state::IndexState;

/// One surviving live message, as yielded by [`Walker`].
///
/// `continuation` is `true` for every item except the very last one the
/// whole walk produces; it lets a consumer that commits progress
/// per-batch (rather than waiting for the iterator to return `None`)
/// know without a separate end marker whether more is still coming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkEntry {
    pub msg_id: [u8; MSG_ID_BYTES],
    pub persistent: i32,
    pub continuation: bool,
}

/// Runs the broker-start classification: lists `queues_root`, deletes
/// every directory that does not decode to a name in `durable_queues`,
/// and returns a [`Walker`] over the remaining durable queues for the
/// message-body store to rebuild its reference counts from.
pub fn broker_start(
    queues_root: PathBuf,
    durable_queues: &HashSet<String>,
    config: Config,
) -> Result<Walker> {
    let (durable, transient_dirs) = layout::classify_queue_dirs(&queues_root, durable_queues)?;

    for dir in transient_dirs {
        log::debug!("purging transient queue directory {}", dir.display());
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(Walker {
        queues_root,
        config,
        pending_queues: durable.into(),
        current: None,
    })
}

struct CurrentQueue {
    state: IndexState,
    remaining: u64,
    entries: VecDeque<WalkEntry>,
}

/// Lazy, restartable traversal over every durable queue's surviving
/// live messages: queues are `init`-ed one at a time (never all at
/// once), and each is `terminate`-ed as soon as its last live message
/// has been yielded.
pub struct Walker {
    queues_root: PathBuf,
    config: Config,
    pending_queues: VecDeque<String>,
    current: Option<CurrentQueue>,
}

impl Walker {
    fn advance_to_next_queue(&mut self) -> Result<bool> {
        loop {
            let Some(queue_name) = self.pending_queues.pop_front() else {
                return Ok(false);
            };
            let dir = layout::queue_dir(&self.queues_root, &queue_name);
            let (count, mut state) = recovery::init(dir, self.config)?;
            if count == 0 {
                state.terminate()?;
                continue;
            }

            let entries = load_queue_entries(&mut state, self.config)?;
            self.current = Some(CurrentQueue {
                state,
                remaining: count,
                entries,
            });
            return Ok(true);
        }
    }

    fn next_entry(&mut self) -> Result<Option<WalkEntry>> {
        loop {
            if self.current.is_none() && !self.advance_to_next_queue()? {
                return Ok(None);
            }
            let current = self.current.as_mut().expect("just populated");
            let Some(mut entry) = current.entries.pop_front() else {
                // Segments were all consumed but remaining > 0 would be
                // an inconsistency between the recovered count and what
                // was actually readable; treat it as end-of-queue.
                let current = self.current.take().expect("checked above");
                current.state.terminate()?;
                continue;
            };
            current.remaining = current.remaining.saturating_sub(1);
            if current.remaining == 0 && current.entries.is_empty() {
                let current = self.current.take().expect("checked above");
                current.state.terminate()?;
            }
            entry.continuation = !(self.current.is_none() && self.pending_queues.is_empty());
            return Ok(Some(entry));
        }
    }
}

impl Iterator for Walker {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Loads every live entry across every segment of a queue, in ascending
/// `seq_id` order, as `WalkEntry`s. `continuation` is filled in later by
/// the caller once the full ordering across queues is known.
fn load_queue_entries(state: &mut IndexState, config: Config) -> Result<VecDeque<WalkEntry>> {
    let mut entries = VecDeque::new();
    let (lo, next) = state.find_lowest_seq_id_seg_and_next_seq_id()?;
    if next == 0 {
        return Ok(entries);
    }
    let mut boundary = config.segment_of(lo) * config.segment_span;
    while boundary < next {
        for entry in state.read_segment_entries(boundary)? {
            entries.push_back(WalkEntry {
                msg_id: entry.msg_id,
                persistent: entry.persistent as i32,
                continuation: true,
            });
        }
        boundary += config.segment_span;
    }
    Ok(entries)
}
