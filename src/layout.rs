//! Directory layout conventions for the broker's `queues/` tree and the
//! reversible, filesystem-safe encoding of a queue's identity used for
//! its directory name.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub fn encode_queue_name(name: &str) -> String {
    base64::encode(name.as_bytes())
        .replace('/', "_")
        .replace('+', "-")
}

pub fn decode_queue_name(encoded: &str) -> Result<String> {
    let restored = encoded.replace('_', "/").replace('-', "+");
    let bytes = base64::decode(restored.as_bytes())
        .map_err(|_| Error::Corrupt("queue directory name is not valid base64"))?;
    String::from_utf8(bytes).map_err(|_| Error::Corrupt("queue directory name is not valid utf-8"))
}

pub fn queue_dir(queues_root: &Path, queue_name: &str) -> PathBuf {
    queues_root.join(encode_queue_name(queue_name))
}

/// Partitions the directories directly under `queues_root` into durable
/// and transient queue names, by decoding each directory name and
/// checking membership in `durable_queues`. Directories whose name does
/// not decode to a valid queue name at all are treated as transient —
/// they cannot correspond to any durable queue, so they are purged on
/// broker start the same as any other stale directory.
pub fn classify_queue_dirs(
    queues_root: &Path,
    durable_queues: &std::collections::HashSet<String>,
) -> Result<(Vec<String>, Vec<PathBuf>)> {
    let mut durable = Vec::new();
    let mut transient_dirs = Vec::new();

    let read_dir = match fs::read_dir(queues_root) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((durable, transient_dirs))
        }
        Err(err) => return Err(err.into()),
    };

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match decode_queue_name(dir_name) {
            Ok(queue_name) if durable_queues.contains(&queue_name) => durable.push(queue_name),
            _ => transient_dirs.push(path),
        }
    }

    Ok((durable, transient_dirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    #[test]
    fn queue_name_round_trips_through_encoding() {
        for name in ["orders", "orders/eu-west", "weird+name/with+slashes"] {
            let encoded = encode_queue_name(name);
            assert!(!encoded.contains('/'));
            assert!(!encoded.contains('+'));
            let decoded = decode_queue_name(&encoded).expect("decode");
            assert_eq!(decoded, name);
        }
    }

    #[test]
    fn classify_splits_durable_and_transient_and_unparseable() {
        let dir = tempdir().expect("tempdir");
        let queues_root = dir.path();

        let durable_name = "orders";
        fs::create_dir_all(queues_root.join(encode_queue_name(durable_name))).unwrap();

        let stale_name = "retired-queue";
        fs::create_dir_all(queues_root.join(encode_queue_name(stale_name))).unwrap();

        fs::create_dir_all(queues_root.join("not-base64-!!!")).unwrap();

        let mut durable_queues = HashSet::new();
        durable_queues.insert(durable_name.to_string());

        let (durable, transient_dirs) = classify_queue_dirs(queues_root, &durable_queues).expect("classify");
        assert_eq!(durable, vec![durable_name.to_string()]);
        assert_eq!(transient_dirs.len(), 2);
    }
}
