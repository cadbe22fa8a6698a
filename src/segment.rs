//! Segment I/O: append, load, and delete one segment file.
//!
//! A segment never caches its materialised map across calls — the
//! working set model assumes at most a few segments are touched per
//! call (head and tail), so [`load_segment`] allocates a small
//! [`SegmentMap`] locally and the caller drops it on return.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::codec::{self, Record, MSG_ID_BYTES};
use crate::config::Config;
use crate::error::Result;

pub const SEGMENT_EXTENSION: &str = "idx";

/// One live entry in a segment's in-memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    pub msg_id: [u8; MSG_ID_BYTES],
    pub persistent: bool,
    pub delivered: bool,
}

/// `rel_seq -> entry`, ordered ascending by construction (`BTreeMap`),
/// matching the ascending-`seq_id` contract of `read_segment_entries`.
pub type SegmentMap = BTreeMap<u16, SegmentEntry>;

pub fn segment_path(dir: &Path, segment: u64) -> PathBuf {
    dir.join(format!("{segment:09}.{SEGMENT_EXTENSION}"))
}

/// Lists the segment numbers present in `dir`, derived from filenames
/// matching `<n>.idx`. Unparseable entries are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut segments = Vec::new();
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(segments),
        Err(err) => return Err(err.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(segment) = stem.parse::<u64>() {
            segments.push(segment);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

pub fn append_publish(file: &mut File, rel_seq: u16, persistent: bool, msg_id: &[u8]) -> Result<()> {
    let record = codec::encode_publish(rel_seq, persistent, msg_id)?;
    file.write_all(&record)?;
    Ok(())
}

pub fn append_deliver(file: &mut File, rel_seq: u16) -> Result<()> {
    let record = codec::encode_deliver(rel_seq);
    file.write_all(&record)?;
    Ok(())
}

/// Scatters a batch of acks into a segment file.
///
/// If the segment becomes fully acked (`prior_ack_count + acks.len() ==
/// config.segment_span`) the file is deleted outright — an absent file
/// is treated as a successful delete, since recovery may already have
/// removed it. Otherwise a deliver-only record is appended for each
/// rel-seq (marking the second occurrence, i.e. the ack, per the
/// tri-state encoding), the file is fsynced and closed.
///
/// Returns the new ack count for the segment.
pub fn append_acks_to_segment(
    config: &Config,
    seg_path: &Path,
    prior_ack_count: u64,
    ack_rel_seqs: &[u16],
) -> Result<u64> {
    let new_count = prior_ack_count + ack_rel_seqs.len() as u64;
    if new_count == config.segment_span {
        match fs::remove_file(seg_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(config.segment_span);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(seg_path)?;
    for &rel_seq in ack_rel_seqs {
        append_deliver(&mut file, rel_seq)?;
    }
    file.sync_all()?;
    drop(file);
    Ok(new_count)
}

/// Loads a segment file into its in-memory map.
///
/// Returns `(map, ack_count, high_rel_seq)`. `high_rel_seq` is the
/// largest rel-seq seen in any publish record, used by
/// `find_lowest_seq_id_seg_and_next_seq_id` to compute the next fresh
/// `seq_id`.
///
/// `journal_acks` is the set of rel-seqs (for this segment only) that
/// the ack journal already considers acked; those entries are removed
/// from the returned map and folded into `ack_count` even if the
/// segment file itself has not yet recorded the ack.
///
/// A missing segment file is treated as empty (recovery-safe). A
/// truncated trailing record stops the scan at the truncation point
/// without failing. An orphan deliver-only record — one whose rel-seq
/// is not already present in the map — indicates a corrupted segment;
/// it is logged and skipped rather than treated as fatal.
pub fn load_segment(
    seg_path: &Path,
    journal_acks: impl IntoIterator<Item = u16>,
) -> Result<(SegmentMap, u64, Option<u16>)> {
    let mut map = SegmentMap::new();
    let mut ack_count: u64 = 0;
    let mut high_rel_seq: Option<u16> = None;

    let mut file = match File::open(seg_path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((map, ack_count, high_rel_seq))
        }
        Err(err) => return Err(err.into()),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let mut cursor = &buf[..];

    loop {
        match codec::decode_one(cursor)? {
            None => break,
            Some((record, consumed)) => {
                cursor = &cursor[consumed..];
                match record {
                    Record::Publish {
                        rel_seq,
                        persistent,
                        msg_id,
                    } => {
                        map.insert(
                            rel_seq,
                            SegmentEntry {
                                msg_id,
                                persistent,
                                delivered: false,
                            },
                        );
                        high_rel_seq = Some(match high_rel_seq {
                            Some(current) => current.max(rel_seq),
                            None => rel_seq,
                        });
                    }
                    Record::DeliverOrAck { rel_seq } => match map.get_mut(&rel_seq) {
                        Some(entry) if !entry.delivered => entry.delivered = true,
                        Some(_) => {
                            map.remove(&rel_seq);
                            ack_count += 1;
                        }
                        None => {
                            log::warn!(
                                "{}: orphan deliver/ack record for rel_seq {rel_seq} with no publish; skipping",
                                seg_path.display()
                            );
                        }
                    },
                }
            }
        }
    }

    for rel_seq in journal_acks {
        if map.remove(&rel_seq).is_some() {
            ack_count += 1;
        }
    }

    Ok((map, ack_count, high_rel_seq))
}
