//! Ack journal: a shared, append-only log of full sequence ids for one
//! queue, used to absorb unordered acknowledgements cheaply before they
//! are scattered into their segment files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::{self, SEQ_BYTES};
use crate::config::Config;
use crate::error::Result;

pub const ACK_JOURNAL_FILENAME: &str = "ack_journal.jif";

pub fn journal_path(dir: &Path) -> PathBuf {
    dir.join(ACK_JOURNAL_FILENAME)
}

/// The journal file handle plus the in-memory grouping of not-yet-scattered
/// acks by segment number. The grouping is a set, not a list, so that the
/// dedup relied upon at flush time (the same `seq_id` acked twice collapses
/// to one scatter) falls out of the data structure instead of needing a
/// per-flush dedup pass.
pub struct AckJournal {
    file: File,
    pending: BTreeMap<u64, BTreeSet<u16>>,
    pending_count: usize,
}

impl AckJournal {
    pub fn open(dir: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(journal_path(dir))?;
        Ok(Self {
            file,
            pending: BTreeMap::new(),
            pending_count: 0,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Returns the rel-seqs journaled-but-not-yet-scattered for `segment`,
    /// without draining them — unlike `take_one_group`, this is a peek.
    /// Used by reads (`IndexState::read_segment_entries`) that must honor
    /// "journaled acks are authoritative" without flushing first.
    pub fn pending_for(&self, segment: u64) -> impl Iterator<Item = u16> + '_ {
        self.pending
            .get(&segment)
            .into_iter()
            .flat_map(|rel_seqs| rel_seqs.iter().copied())
    }

    /// Appends `seq_ids` to the journal file and groups them in memory by
    /// segment. The journal file itself is not fsynced here — write-behind
    /// buffering is intentional (see the crate's durability notes): a lost
    /// journal tail on crash simply replays as "ack not yet received",
    /// which recovery tolerates.
    pub fn append(&mut self, config: &Config, seq_ids: &[u64]) -> Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        for &seq_id in seq_ids {
            self.file.write_all(&codec::encode_journal_ack(seq_id))?;
            let segment = config.segment_of(seq_id);
            let rel_seq = config.rel_seq_of(seq_id);
            if self
                .pending
                .entry(segment)
                .or_insert_with(BTreeSet::new)
                .insert(rel_seq)
            {
                self.pending_count += 1;
            }
        }
        Ok(())
    }

    /// Picks one pending segment's ack group for the caller to scatter,
    /// removing it from the in-memory grouping. Returns `None` if nothing
    /// is pending.
    pub fn take_one_group(&mut self) -> Option<(u64, Vec<u16>)> {
        let segment = *self.pending.keys().next()?;
        let rel_seqs = self.pending.remove(&segment)?;
        self.pending_count -= rel_seqs.len();
        Some((segment, rel_seqs.into_iter().collect()))
    }

    /// Rewinds and truncates the journal file to zero length. Called once
    /// every pending ack has been scattered into its segment.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        Ok(())
    }

    /// Reads every full sequence id currently recorded in the journal
    /// file, used during recovery to seed the combined journal-ack map
    /// before the journal itself is deleted. A short trailing read (a
    /// torn last entry) is tolerated and simply ignored.
    pub fn read_all(&mut self) -> Result<Vec<u64>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        let mut seq_ids = Vec::with_capacity(buf.len() / SEQ_BYTES);
        let mut chunks = buf.chunks_exact(SEQ_BYTES);
        for chunk in &mut chunks {
            let mut array = [0u8; SEQ_BYTES];
            array.copy_from_slice(chunk);
            seq_ids.push(codec::decode_journal_ack(&array));
        }
        Ok(seq_ids)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
