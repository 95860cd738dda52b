//! Job name generation.
//!
//! Names are for humans reading logs and dashboards; the integer id is the
//! identity, so collisions are harmless. Two fixed word lists give each job
//! a memorable tail.

use rand::seq::SliceRandom;
use std::path::Path;

const CHARACTERS: &[&str] = &[
    "sherman",
    "fillmore",
    "ernie",
    "megan",
    "herman",
    "thor",
    "shelly",
    "hawthorne",
    "stillwater",
    "fiona",
    "trixie",
    "olivia",
    "captain_quigley",
];

const ACTIVITIES: &[&str] = &[
    "sleeping",
    "sitting",
    "standing",
    "walking",
    "running",
    "jumping",
    "flying",
    "swimming",
    "diving",
    "surfing",
    "fishing",
    "eating",
    "drinking",
    "singing",
    "dancing",
    "laughing",
];

/// `"{model} {video stem} {character} {activity}"`.
pub fn generate_job_name(model: &str, video_url: &str) -> String {
    let mut rng = rand::thread_rng();
    let character = CHARACTERS.choose(&mut rng).copied().unwrap_or("sherman");
    let activity = ACTIVITIES.choose(&mut rng).copied().unwrap_or("swimming");
    format!("{model} {} {character} {activity}", video_stem(video_url))
}

/// File stem of the video reference. Query-style URLs keep only the part
/// after the last `=` so presigned links still produce a readable stem.
pub fn video_stem(video_url: &str) -> String {
    let tail = video_url.rsplit('=').next().unwrap_or(video_url);
    Path::new(tail)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(tail)
        .to_string()
}
