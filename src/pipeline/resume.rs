//! # Resume Reconciliation
//!
//! Riconcilia gli artefatti su disco di un run interrotto con i conteggi attesi.
//!
//! ## Regole:
//! - Frame estratti: pronti se il conteggio è entro ±1 da quello atteso,
//!   contando anche la sotto-directory `processed` (meno la sua entry)
//! - Batch AI parziale: gli ultimi due frame di output possono essere
//!   incompleti; vengono cancellati e rifatti, gli altri sorgenti spostati in
//!   `processed` così il tool riparte solo sui frame mancanti

use anyhow::Result;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::file_manager::FileManager;

/// Side-directory holding source frames whose AI output already exists
pub const PROCESSED_DIR: &str = "processed";

/// Output frames of an interrupted batch that are redone
pub const UNTRUSTED_TAIL: usize = 2;

/// State of an existing frames directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramesState {
    /// Nothing extracted yet
    Missing,
    /// Within ±1 of the expected count; extraction can be skipped
    Ready(u64),
    /// Off by more than 1; must be destroyed and extracted again
    Stale(u64),
}

/// Whether an obtained frame count is acceptable for an expected one
pub fn within_tolerance(obtained: u64, expected: u64) -> bool {
    obtained.abs_diff(expected) <= 1
}

/// Frames extracted so far, including those moved to `processed`
pub async fn count_extracted_frames(frames_dir: &Path) -> Result<u64> {
    let processed = frames_dir.join(PROCESSED_DIR);
    let top = FileManager::count_entries(frames_dir).await? as u64;
    if fs::try_exists(&processed).await.unwrap_or(false) {
        let moved = FileManager::count_entries(&processed).await? as u64;
        Ok(top.saturating_sub(1) + moved)
    } else {
        Ok(top)
    }
}

/// Check whether a previous extraction can be reused
pub async fn frames_ready(frames_dir: &Path, expected: u64) -> Result<FramesState> {
    if !fs::try_exists(frames_dir).await.unwrap_or(false) {
        return Ok(FramesState::Missing);
    }
    let obtained = count_extracted_frames(frames_dir).await?;
    debug!(
        "{} holds {} frames, {} expected",
        frames_dir.display(),
        obtained,
        expected
    );
    Ok(if within_tolerance(obtained, expected) {
        FramesState::Ready(obtained)
    } else {
        FramesState::Stale(obtained)
    })
}

/// What `reconcile_partial_batch` changed on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Source frames moved into `processed`
    pub moved: usize,
    /// Output frames deleted to be redone
    pub removed: Vec<String>,
}

/// Prepare an interrupted AI batch for resuming.
///
/// Output names are sorted; for every output frame except the last two, the
/// source frame with the same name moves to `<frames_dir>/processed` (already
/// moved frames are ignored). The last two output frames are deleted.
pub async fn reconcile_partial_batch(frames_dir: &Path, output_dir: &Path) -> Result<ReconcileReport> {
    let outputs = FileManager::sorted_file_names(output_dir).await?;
    let processed = frames_dir.join(PROCESSED_DIR);
    fs::create_dir_all(&processed).await?;

    let keep = outputs.len().saturating_sub(UNTRUSTED_TAIL);
    let (trusted, untrusted) = outputs.split_at(keep);

    let mut report = ReconcileReport::default();
    for name in trusted {
        match fs::rename(frames_dir.join(name), processed.join(name)).await {
            Ok(()) => report.moved += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    for name in untrusted {
        fs::remove_file(output_dir.join(name)).await?;
        report.removed.push(name.clone());
    }

    debug!(
        "Reconciled {}: {} moved to processed, {} removed",
        output_dir.display(),
        report.moved,
        report.removed.len()
    );
    Ok(report)
}
