//! Index state: the single-slot open-segment handle cache, the ack
//! journal, and the public operations a live queue calls.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::codec::MSG_ID_BYTES;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::journal::AckJournal;
use crate::segment;

/// One live entry as returned by `read_segment_entries`, carrying the
/// full `seq_id` (segment-relative internally, reconstituted for the
/// caller) alongside the fields recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub msg_id: [u8; MSG_ID_BYTES],
    pub seq_id: u64,
    pub persistent: bool,
    pub delivered: bool,
}

struct OpenSegment {
    segment: u64,
    file: File,
}

/// Owns one queue's directory, journal handle, and the single open
/// segment handle. All operations are single-threaded with respect to a
/// given `IndexState` — cross-queue parallelism comes from holding
/// independent `IndexState`s per queue, not from locking inside one.
pub struct IndexState {
    pub(crate) dir: PathBuf,
    pub(crate) config: Config,
    handle: Option<OpenSegment>,
    journal: AckJournal,
    ack_counts: HashMap<u64, u64>,
}

impl IndexState {
    pub(crate) fn new(dir: PathBuf, config: Config, journal: AckJournal, ack_counts: HashMap<u64, u64>) -> Self {
        Self {
            dir,
            config,
            handle: None,
            journal,
            ack_counts,
        }
    }

    pub(crate) fn ack_counts_mut(&mut self) -> &mut HashMap<u64, u64> {
        &mut self.ack_counts
    }

    pub(crate) fn journal_mut(&mut self) -> &mut AckJournal {
        &mut self.journal
    }

    /// Returns the open handle for `segment`, switching (and syncing the
    /// prior handle) if the currently open segment differs. At most one
    /// segment file is ever open for writing.
    fn get_file_handle(&mut self, segment: u64) -> Result<&mut File> {
        let needs_switch = match &self.handle {
            Some(open) => open.segment != segment,
            None => true,
        };
        if needs_switch {
            self.close_current_handle()?;
            let path = segment::segment_path(&self.dir, segment);
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
            self.handle = Some(OpenSegment { segment, file });
        }
        Ok(&mut self.handle.as_mut().expect("handle just set").file)
    }

    fn close_current_handle(&mut self) -> Result<()> {
        if let Some(open) = self.handle.take() {
            open.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes the current handle if it refers to `segment`, without
    /// opening a replacement. Used by `flush_journal` before scattering
    /// acks into a segment that might currently be the write target.
    fn close_if_current(&mut self, segment: u64) -> Result<()> {
        if matches!(&self.handle, Some(open) if open.segment == segment) {
            self.close_current_handle()?;
        }
        Ok(())
    }

    pub fn write_published(&mut self, msg_id: &[u8], seq_id: u64, persistent: bool) -> Result<()> {
        if msg_id.len() != MSG_ID_BYTES {
            return Err(Error::InvalidMessageId { len: msg_id.len() });
        }
        let segment = self.config.segment_of(seq_id);
        let rel_seq = self.config.rel_seq_of(seq_id);
        let file = self.get_file_handle(segment)?;
        segment::append_publish(file, rel_seq, persistent, msg_id)
    }

    pub fn write_delivered(&mut self, seq_id: u64) -> Result<()> {
        let segment = self.config.segment_of(seq_id);
        let rel_seq = self.config.rel_seq_of(seq_id);
        let file = self.get_file_handle(segment)?;
        segment::append_deliver(file, rel_seq)
    }

    /// Journals a batch of acks, triggering a flush cycle if the
    /// journaled count now exceeds the high-water mark. A `seq_id` acked
    /// twice across calls is idempotent: the journal's per-segment
    /// grouping is a set, so the duplicate collapses before it is ever
    /// scattered.
    pub fn write_acks(&mut self, seq_ids: &[u64]) -> Result<()> {
        self.journal.append(&self.config, seq_ids)?;
        if self.journal.pending_count() > self.config.journal_high_water_mark {
            self.flush_journal()?;
        }
        Ok(())
    }

    /// Incremental flush: bounds each call to one segment's worth of
    /// work unless the journal is still over its high-water mark, in
    /// which case it keeps draining. Returns whether more work remains.
    pub fn flush_journal(&mut self) -> Result<bool> {
        loop {
            let Some((segment, rel_seqs)) = self.journal.take_one_group() else {
                return Ok(false);
            };
            self.close_if_current(segment)?;

            let seg_path = segment::segment_path(&self.dir, segment);
            let prior = self.ack_counts.get(&segment).copied().unwrap_or(0);
            let new_count = segment::append_acks_to_segment(&self.config, &seg_path, prior, &rel_seqs)?;

            if new_count >= self.config.segment_span {
                self.ack_counts.remove(&segment);
            } else {
                self.ack_counts.insert(segment, new_count);
            }

            if self.journal.pending_count() == 0 {
                self.journal.truncate()?;
                return Ok(false);
            }
            if self.journal.pending_count() <= self.config.journal_high_water_mark {
                return Ok(true);
            }
            // still over the high-water mark: keep draining
        }
    }

    /// Reads every live entry in the segment whose first `seq_id` is
    /// `init_seq_id`, in ascending `seq_id` order. `init_seq_id` must sit
    /// on a segment boundary. Journaled-but-not-yet-flushed acks for this
    /// segment are applied during the load, per "journaled acks are
    /// authoritative" — a sequence id ack'd via `write_acks` must not be
    /// reported live just because `flush_journal` hasn't scattered it yet.
    pub fn read_segment_entries(&mut self, init_seq_id: u64) -> Result<Vec<QueueEntry>> {
        if self.config.rel_seq_of(init_seq_id) != 0 {
            return Err(Error::NotOnBoundary { seq_id: init_seq_id });
        }
        let segment = self.config.segment_of(init_seq_id);
        let seg_path = segment::segment_path(&self.dir, segment);
        let journal_acks = self.journal.pending_for(segment);
        let (map, _ack_count, _high) = segment::load_segment(&seg_path, journal_acks)?;
        Ok(map
            .into_iter()
            .map(|(rel_seq, entry)| QueueEntry {
                msg_id: entry.msg_id,
                seq_id: self.config.seq_id_of(segment, rel_seq),
                persistent: entry.persistent,
                delivered: entry.delivered,
            })
            .collect())
    }

    pub fn next_segment_boundary(&self, seq_id: u64) -> u64 {
        (self.config.segment_of(seq_id) + 1) * self.config.segment_span
    }

    pub fn segment_size(&self) -> u64 {
        self.config.segment_span
    }

    /// Returns `(lowest live seq_id start, next fresh seq_id)`. Both are
    /// `0` if the queue has no segments on disk.
    pub fn find_lowest_seq_id_seg_and_next_seq_id(&mut self) -> Result<(u64, u64)> {
        let segments = segment::list_segments(&self.dir)?;
        let Some(&lowest) = segments.iter().min() else {
            return Ok((0, 0));
        };
        let &highest = segments.iter().max().expect("non-empty");

        let lo = lowest * self.config.segment_span;
        let high_path = segment::segment_path(&self.dir, highest);
        let (_map, _ack_count, high_rel_seq) = segment::load_segment(&high_path, std::iter::empty())?;
        let next = match high_rel_seq {
            Some(rel_seq) => 1 + self.config.seq_id_of(highest, rel_seq),
            None => self.config.seq_id_of(highest, 0),
        };
        Ok((lo, next))
    }

    /// Drains the journal completely, then syncs and closes the open
    /// segment handle and the journal handle. Subsequent writes against
    /// this state are forbidden — the caller must `init` a fresh state
    /// to continue.
    pub fn terminate(mut self) -> Result<()> {
        while self.flush_journal()? {}
        self.close_current_handle()?;
        self.journal.sync()?;
        Ok(())
    }

    pub fn terminate_and_erase(self) -> Result<()> {
        let dir = self.dir.clone();
        self.terminate()?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
