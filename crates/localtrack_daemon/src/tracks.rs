//! Track counting over result archives.
//!
//! The worker writes one `*.tar.gz` per input video. Each archive holds
//! per-frame JSON of the shape `[_, [[_, {"track_uuid": ...}], ...]]`; the
//! number of tracks in a job is the number of distinct uuids across every
//! JSON member of every archive. Members with `processing` in the name are
//! bookkeeping, not detections.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result archives in an output directory.
pub fn result_archives(out_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(out_dir) else {
        return Vec::new();
    };
    let mut archives: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".tar.gz"))
        })
        .collect();
    archives.sort();
    archives
}

/// Count distinct `track_uuid`s across all archives. Members that fail to
/// parse are skipped with a warning rather than failing the whole job.
pub fn count_unique_tracks(archives: &[PathBuf]) -> Result<usize> {
    let mut unique = HashSet::new();
    for archive in archives {
        collect_track_uuids(archive, &mut unique)
            .with_context(|| format!("Failed to read archive {}", archive.display()))?;
    }
    Ok(unique.len())
}

fn collect_track_uuids(archive: &Path, unique: &mut HashSet<String>) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if !name.ends_with(".json") || name.contains("processing") {
            continue;
        }

        let mut raw = String::new();
        entry.read_to_string(&mut raw)?;
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("Skipping unparseable member {name}: {err}");
                continue;
            }
        };

        let Some(detections) = parsed.get(1).and_then(Value::as_array) else {
            debug!("Member {name} has no detection list");
            continue;
        };
        for detection in detections {
            if let Some(uuid) = detection
                .get(1)
                .and_then(|fields| fields.get("track_uuid"))
                .and_then(Value::as_str)
            {
                unique.insert(uuid.to_string());
            }
        }
    }
    Ok(())
}
