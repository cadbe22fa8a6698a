//! Recovery pipeline: `init(queue_dir)` reconstructs a queue's live
//! message count from whatever is on disk, remediates transient
//! messages that were never delivered, replays the ack journal, and
//! hands back a ready-to-use `IndexState`.

use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::error::Result;
use crate::journal::AckJournal;
use crate::segment::{self, SegmentMap};
use crate::state::IndexState;

/// Opens (creating if necessary) the queue directory at `dir`, replays
/// any unflushed journal state, remediates undelivered transient
/// messages, and returns the number of live (un-acked) messages across
/// all segments plus a ready `IndexState`.
pub fn init(dir: impl Into<std::path::PathBuf>, config: Config) -> Result<(u64, IndexState)> {
    let dir = dir.into();
    std::fs::create_dir_all(&dir)?;

    let segments = segment::list_segments(&dir)?;
    let mut total_msg_count: u64 = 0;
    let mut ack_counts: HashMap<u64, u64> = HashMap::new();
    // transient_ack_map and, later, the combined journal-ack map are kept
    // per-segment so step 5's intersection-based replay only ever touches
    // the segments that actually need it.
    let mut combined_acks: HashMap<u64, Vec<u16>> = HashMap::new();

    for &seg_num in &segments {
        let seg_path = segment::segment_path(&dir, seg_num);
        let (map, ack_count, _high) = segment::load_segment(&seg_path, std::iter::empty())?;
        total_msg_count += map.len() as u64;
        if ack_count > 0 {
            ack_counts.insert(seg_num, ack_count);
        }

        let self_acks = remediate_transient(&dir, seg_num, &map)?;
        if !self_acks.is_empty() {
            combined_acks.entry(seg_num).or_default().extend(self_acks);
        }
    }

    let mut journal = AckJournal::open(&dir)?;
    for seq_id in journal.read_all()? {
        let seg_num = config.segment_of(seq_id);
        let rel_seq = config.rel_seq_of(seq_id);
        combined_acks.entry(seg_num).or_default().push(rel_seq);
    }

    for (seg_num, rel_seqs) in combined_acks {
        let seg_path = segment::segment_path(&dir, seg_num);
        // Reload against an up-to-date view of the segment so the
        // intersection below both dedups (a rel_seq may appear from both
        // transient remediation and the journal) and drops anything
        // already acked.
        let (live_map, _ack_count, _high) = segment::load_segment(&seg_path, std::iter::empty())?;
        let live: HashSet<u16> = rel_seqs
            .into_iter()
            .filter(|rel_seq| live_map.contains_key(rel_seq))
            .collect();
        if live.is_empty() {
            continue;
        }
        let to_ack: Vec<u16> = live.into_iter().collect();
        let prior = ack_counts.get(&seg_num).copied().unwrap_or(0);
        let new_count = segment::append_acks_to_segment(&config, &seg_path, prior, &to_ack)?;
        total_msg_count -= to_ack.len() as u64;
        log::debug!(
            "{}: scattered {} recovery ack(s) into segment {seg_num}",
            dir.display(),
            to_ack.len()
        );
        if new_count >= config.segment_span {
            ack_counts.remove(&seg_num);
        } else {
            ack_counts.insert(seg_num, new_count);
        }
    }

    journal.truncate()?;
    journal.sync()?;

    Ok((total_msg_count, IndexState::new(dir, config, journal, ack_counts)))
}

/// Appends a deliver record (and, for non-persistent entries, schedules
/// a self-ack) for every entry that was published but never delivered.
/// A crashed transient message must not be replayed to consumers, so it
/// is marked delivered and acked in the same pass; a crashed persistent
/// message is only marked delivered, leaving it to be redelivered.
///
/// Returns the rel-seqs scheduled for self-ack.
fn remediate_transient(dir: &std::path::Path, seg_num: u64, map: &SegmentMap) -> Result<Vec<u16>> {
    let undelivered: Vec<(u16, bool)> = map
        .iter()
        .filter(|(_, entry)| !entry.delivered)
        .map(|(&rel_seq, entry)| (rel_seq, entry.persistent))
        .collect();
    if undelivered.is_empty() {
        return Ok(Vec::new());
    }

    let seg_path = segment::segment_path(dir, seg_num);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&seg_path)?;
    let mut self_acks = Vec::new();
    for (rel_seq, persistent) in undelivered {
        segment::append_deliver(&mut file, rel_seq)?;
        if !persistent {
            self_acks.push(rel_seq);
        }
    }
    file.sync_all()?;
    drop(file);

    if !self_acks.is_empty() {
        log::debug!(
            "{}: marked {} undelivered transient message(s) in segment {seg_num} for self-ack",
            dir.display(),
            self_acks.len()
        );
    }
    Ok(self_acks)
}
