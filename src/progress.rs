//! # Progress Tracking and Statistics Module
//!
//! Questo modulo rende su console il flusso di `PipelineEvent` dell'engine.
//!
//! ## Responsabilità:
//! - Progress bar dei file del run con `indicatif`
//! - Progress bar dei frame prodotti dai tool AI (alimentata dal frame watcher)
//! - Tracking statistiche per esito (completed, skipped, error, aborted)
//! - Report finale del run
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [=========>------------------------------] 3/12 (25%) clip.mp4: upscale
//!   [00:01:02] [===================>--------------------] 1200/2400 frames
//! ```

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::events::PipelineEvent;
use crate::media::{FileOutcome, RunSummary};

/// Manages the file-level progress bar of a run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Update progress with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Set a custom message without incrementing
    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Bar counting frames written by an AI tool
    pub fn frames(total: u64, already: u64) -> ProgressBar {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  [{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} frames ({eta})")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_position(already);
        bar
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

/// Statistics tracker for run outcomes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub files_processed: usize,
    pub files_completed: usize,
    pub files_skipped: usize,
    pub errors: usize,
    pub aborted: usize,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, outcome: &FileOutcome) {
        self.files_processed += 1;
        match outcome {
            FileOutcome::Completed => self.files_completed += 1,
            FileOutcome::Skipped(_) => self.files_skipped += 1,
            FileOutcome::Failed(_) => self.errors += 1,
            FileOutcome::Stopped => self.aborted += 1,
        }
    }

    pub fn from_summary(summary: &RunSummary) -> Self {
        let mut stats = Self::new();
        for (_, outcome) in &summary.outcomes {
            stats.add(outcome);
        }
        stats
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Completed: {} | Skipped: {} | Errors: {} | Aborted: {}",
            self.files_processed,
            self.files_completed,
            self.files_skipped,
            self.errors,
            self.aborted
        )
    }
}

/// Console view of a run, driven by pipeline events
pub struct ConsoleRenderer {
    multi: MultiProgress,
    files: Option<ProgressManager>,
    frames: Option<ProgressBar>,
    stats: RunStats,
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            files: None,
            frames: None,
            stats: RunStats::new(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn handle(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStart { total_files, .. } => {
                let manager = ProgressManager::new(*total_files as u64);
                self.multi.add(manager.bar().clone());
                self.files = Some(manager);
                self.stats = RunStats::new();
            }
            PipelineEvent::FileStart { name, .. } => {
                if let Some(files) = &self.files {
                    files.set_message(name);
                }
            }
            PipelineEvent::StepStart { name, step } => {
                if let Some(files) = &self.files {
                    files.set_message(&format!("{}: {}", name, step));
                }
            }
            PipelineEvent::ProgressStart { already, total, .. } => {
                let bar = ProgressManager::frames(*total as u64, *already as u64);
                self.frames = Some(self.multi.add(bar));
            }
            PipelineEvent::ProgressTick { done, .. } => {
                if let Some(frames) = &self.frames {
                    frames.set_position(*done as u64);
                }
            }
            PipelineEvent::ProgressStop { done, .. } => {
                if let Some(frames) = self.frames.take() {
                    frames.set_position(*done as u64);
                    frames.finish_and_clear();
                    self.multi.remove(&frames);
                }
            }
            PipelineEvent::FileFinish { name, outcome } => {
                self.stats.add(outcome);
                if let Some(files) = &self.files {
                    files.update(&format!("{}: {}", name, outcome.label()));
                }
            }
            PipelineEvent::RunFinish { summary } => {
                if let Some(files) = self.files.take() {
                    let status = if summary.stopped { "STOP" } else { "END" };
                    files.finish(&format!("Process {} {}", summary.kind, status));
                }
            }
            PipelineEvent::StepFinish { .. } | PipelineEvent::Log { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PipelineKind;

    #[test]
    fn test_stats_from_summary() {
        let mut summary = RunSummary::new(PipelineKind::Upscale);
        summary.outcomes = vec![
            ("a.mp4".to_string(), FileOutcome::Completed),
            ("b.mp4".to_string(), FileOutcome::Failed("exit code 1".to_string())),
            ("c.mp4".to_string(), FileOutcome::Skipped("not a video".to_string())),
            ("d.mp4".to_string(), FileOutcome::Stopped),
        ];
        let stats = RunStats::from_summary(&summary);
        assert_eq!(stats.files_processed, 4);
        assert_eq!(stats.files_completed, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.aborted, 1);
        assert!(stats.format_summary().contains("Aborted: 1"));
    }

    #[test]
    fn test_renderer_counts_file_events() {
        let mut renderer = ConsoleRenderer::new();
        renderer.handle(&PipelineEvent::RunStart {
            kind: PipelineKind::Optimize,
            total_files: 2,
        });
        renderer.handle(&PipelineEvent::FileFinish {
            name: "a.mp4".to_string(),
            outcome: FileOutcome::Completed,
        });
        renderer.handle(&PipelineEvent::FileFinish {
            name: "b.mp4".to_string(),
            outcome: FileOutcome::Skipped("no gain".to_string()),
        });
        assert_eq!(renderer.stats().files_completed, 1);
        assert_eq!(renderer.stats().files_skipped, 1);
    }
}
