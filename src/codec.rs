//! Bit-packed record codec shared by segment files and the ack journal.
//!
//! Three record kinds share one segment file, distinguished by the high
//! bit of the first byte:
//!
//! ```text
//! bit 7 = 0:  deliver-only / in-segment ack   (2 bytes)
//!    [00rr rrrr] [rrrr rrrr]                   14-bit rel_seq, big-endian
//! bit 7 = 1:  publish                          (18 bytes)
//!    [1prr rrrr] [rrrr rrrr] <16-byte msg_id>   p = persistence flag
//! ```
//!
//! The journal holds a third, framing-free kind: a bare 8-byte big-endian
//! sequence id per entry.

use crate::error::{Error, Result};

/// Rel-seqs per segment. `seq_id div SEGMENT_SPAN` is the segment number;
/// `seq_id mod SEGMENT_SPAN` is the rel-seq, which fits in 14 bits.
pub const SEGMENT_SPAN: u64 = 16_384;

/// Journaled-ack count that triggers an eager flush cycle.
pub const JOURNAL_HIGH_WATER_MARK: usize = 32_768;

pub const MSG_ID_BYTES: usize = 16;
pub const SEQ_BYTES: usize = 8;

pub const DELIVER_RECORD_LEN: usize = 2;
pub const PUBLISH_RECORD_LEN: usize = 2 + MSG_ID_BYTES;

const REL_SEQ_MASK: u16 = 0x3FFF;

/// One decoded segment-file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// A deliver marker, or (on its second occurrence for the same
    /// rel-seq) an in-segment ack. The segment file does not distinguish
    /// the two on the wire — `segment::load_segment` tells them apart by
    /// tracking which rel-seqs have already been marked delivered.
    DeliverOrAck { rel_seq: u16 },
    Publish {
        rel_seq: u16,
        persistent: bool,
        msg_id: [u8; MSG_ID_BYTES],
    },
}

#[inline]
pub fn segment_of(seq_id: u64) -> u64 {
    seq_id / SEGMENT_SPAN
}

#[inline]
pub fn rel_seq_of(seq_id: u64) -> u16 {
    (seq_id % SEGMENT_SPAN) as u16
}

#[inline]
pub fn seq_id_of(segment: u64, rel_seq: u16) -> u64 {
    segment * SEGMENT_SPAN + rel_seq as u64
}

pub fn encode_deliver(rel_seq: u16) -> [u8; DELIVER_RECORD_LEN] {
    let r = rel_seq & REL_SEQ_MASK;
    [(r >> 8) as u8, (r & 0xFF) as u8]
}

pub fn encode_publish(rel_seq: u16, persistent: bool, msg_id: &[u8]) -> Result<[u8; PUBLISH_RECORD_LEN]> {
    if msg_id.len() != MSG_ID_BYTES {
        return Err(Error::InvalidMessageId { len: msg_id.len() });
    }
    let r = rel_seq & REL_SEQ_MASK;
    let mut buf = [0u8; PUBLISH_RECORD_LEN];
    let mut prefix = 0x80 | ((r >> 8) as u8);
    if persistent {
        prefix |= 0x40;
    }
    buf[0] = prefix;
    buf[1] = (r & 0xFF) as u8;
    buf[2..].copy_from_slice(msg_id);
    Ok(buf)
}

/// Decodes one record from the front of `buf`, returning the record and
/// the number of bytes it consumed. Returns `Ok(None)` if `buf` does not
/// hold a complete record (a truncated trailing record) — the caller
/// stops scanning rather than treating this as an error, per the crash
/// model: a torn tail record is discarded, not reported.
pub fn decode_one(buf: &[u8]) -> Result<Option<(Record, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let is_publish = buf[0] & 0x80 != 0;
    if is_publish {
        if buf.len() < PUBLISH_RECORD_LEN {
            return Ok(None);
        }
        let persistent = buf[0] & 0x40 != 0;
        let rel_seq = (((buf[0] & 0x3F) as u16) << 8) | buf[1] as u16;
        let mut msg_id = [0u8; MSG_ID_BYTES];
        msg_id.copy_from_slice(&buf[2..PUBLISH_RECORD_LEN]);
        Ok(Some((
            Record::Publish {
                rel_seq,
                persistent,
                msg_id,
            },
            PUBLISH_RECORD_LEN,
        )))
    } else {
        if buf.len() < DELIVER_RECORD_LEN {
            return Ok(None);
        }
        let rel_seq = (((buf[0] & 0x3F) as u16) << 8) | buf[1] as u16;
        Ok(Some((Record::DeliverOrAck { rel_seq }, DELIVER_RECORD_LEN)))
    }
}

pub fn encode_journal_ack(seq_id: u64) -> [u8; SEQ_BYTES] {
    seq_id.to_be_bytes()
}

pub fn decode_journal_ack(buf: &[u8; SEQ_BYTES]) -> u64 {
    u64::from_be_bytes(*buf)
}
