//! # Pipeline Engine
//!
//! Macchina a stati di un run: per ogni file selezionato, in ordine di worklist,
//! calcola i parametri, costruisce i comandi e li esegue uno alla volta.
//!
//! ## Stati per file:
//! `PENDING -> SKIPPED | ELIGIBLE -> SKIPPED | RUNNING -> COMPLETED | FAILED | STOPPED`
//!
//! - `SKIPPED` / `FAILED`: terminali solo per il file, il run prosegue
//! - `STOPPED`: terminale per l'intero run (kill richiesto dall'utente)
//!
//! ## Politiche:
//! - Nessun retry automatico: un fallimento marca il file e si passa al successivo
//! - Gli artefatti parziali di upscale/interpolate restano su disco in caso di
//!   fallimento o stop, per permettere il resume al run successivo
//! - Il kill è controllato dopo ogni step, mai a metà di uno step
//! - A fine run la directory di output del processo viene rimossa se vuota

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

use crate::command_builder::{
    resize_dimensions, should_optimize, target_bit_rate, CommandBuilder, CommandLine,
};
use crate::config::Config;
use crate::error::{BuildError, ScripyError};
use crate::events::{EventSink, PipelineEvent};
use crate::file_manager::FileManager;
use crate::media::{
    FileOutcome, PipelineKind, PipelineParams, ProbedInfo, RunSummary, Substep, UpscaleFactor,
    VideoRecord, WorkParams,
};
use crate::pipeline::frame_watcher::FrameWatcher;
use crate::pipeline::path_resolver::PathResolver;
use crate::pipeline::preview::{compose_grid, grid_layout, preview_offsets};
use crate::pipeline::resume::{frames_ready, reconcile_partial_batch, within_tolerance, FramesState};
use crate::runner::{ProcessOutcome, ProcessRunner};

/// Result of one external step
#[derive(Debug, Clone, PartialEq)]
enum StepResult {
    Success,
    Failed(String),
    Stopped,
}

/// Runs one pipeline kind over a worklist
pub struct PipelineEngine {
    config: Config,
    builder: CommandBuilder,
    runner: Arc<ProcessRunner>,
    events: EventSink,
    cancel: Arc<AtomicBool>,
}

/// Early exit of a per-file flow with its final outcome
macro_rules! step {
    ($result:expr) => {
        match $result {
            StepResult::Success => {}
            StepResult::Failed(reason) => return FileOutcome::Failed(reason),
            StepResult::Stopped => return FileOutcome::Stopped,
        }
    };
}

impl PipelineEngine {
    pub fn new(
        config: Config,
        builder: CommandBuilder,
        runner: Arc<ProcessRunner>,
        events: EventSink,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            builder,
            runner,
            events,
            cancel,
        }
    }

    fn paths(&self) -> &PathResolver {
        self.builder.paths()
    }

    /// Cancel requested through the orchestrator or observed by the runner
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
            || self.runner.was_killed()
            || self.runner.stop_requested()
    }

    /// Run `params` over the selected records, in order.
    ///
    /// Never fails: every problem ends up as a per-file outcome.
    pub async fn run(&self, records: &mut [VideoRecord], params: &PipelineParams) -> RunSummary {
        let start_time = Instant::now();
        let kind = params.kind();
        let mut summary = RunSummary::new(kind);
        let total = records.iter().filter(|r| r.selected).count();

        info!("Process {} BEGIN", kind);
        self.events.emit(PipelineEvent::RunStart {
            kind,
            total_files: total,
        });

        let output_dir = self.paths().output_dir(kind);
        if let Err(e) = PathResolver::ensure_dir(&output_dir).await {
            self.events.error(e.to_string());
            for record in records.iter().filter(|r| r.selected) {
                self.finish_file(&mut summary, &record.name, FileOutcome::Failed(e.to_string()));
            }
            return self.finish_run(summary, start_time);
        }

        if kind == PipelineKind::Stream {
            self.run_stream(records, &mut summary).await;
        } else {
            for (index, record) in records.iter_mut().filter(|r| r.selected).enumerate() {
                if self.is_cancelled() {
                    summary.stopped = true;
                    break;
                }

                info!("{}", format!("{}/{}", index + 1, total));
                info!("{}", record.name);
                self.events.emit(PipelineEvent::FileStart {
                    name: record.name.clone(),
                    index,
                    total,
                });

                let outcome = self.process_file(record, params).await;
                let stopped = outcome == FileOutcome::Stopped;
                self.finish_file(&mut summary, &record.name, outcome);
                if stopped {
                    summary.stopped = true;
                    break;
                }
            }
        }

        if FileManager::remove_empty_dir(&output_dir).await {
            debug!("Removed empty output folder {}", output_dir.display());
        }
        self.finish_run(summary, start_time)
    }

    fn finish_file(&self, summary: &mut RunSummary, name: &str, outcome: FileOutcome) {
        match &outcome {
            FileOutcome::Completed => self.events.info(format!("{}: completed", name)),
            FileOutcome::Skipped(reason) => self.events.warn(format!("Skipped {}: {}", name, reason)),
            FileOutcome::Failed(reason) => self.events.error(format!("{} failed: {}", name, reason)),
            FileOutcome::Stopped => self.events.warn(format!("{}: aborted", name)),
        }
        self.events.emit(PipelineEvent::FileFinish {
            name: name.to_string(),
            outcome: outcome.clone(),
        });
        summary.outcomes.push((name.to_string(), outcome));
    }

    fn finish_run(&self, mut summary: RunSummary, start_time: Instant) -> RunSummary {
        summary.elapsed_secs = start_time.elapsed().as_secs_f64();
        info!(
            "Process {} {}",
            summary.kind,
            if summary.stopped { "STOP" } else { "END" }
        );
        self.events.emit(PipelineEvent::RunFinish {
            summary: summary.clone(),
        });
        summary
    }

    async fn process_file(&self, record: &mut VideoRecord, params: &PipelineParams) -> FileOutcome {
        if !record.is_video() {
            return FileOutcome::Skipped("not a video file".to_string());
        }
        let Some(info) = record.info.clone() else {
            return FileOutcome::Failed("video metadata missing".to_string());
        };
        record.work = WorkParams::default();

        match params {
            PipelineParams::Optimize { quality } => self.optimize(record, &info, *quality).await,
            PipelineParams::Resize {
                width,
                height,
                quality,
            } => self.resize(record, &info, *width, *height, *quality).await,
            PipelineParams::Upscale { factor, quality } => {
                self.upscale(record, &info, factor, *quality).await
            }
            PipelineParams::Interpolate { fps, quality } => {
                self.interpolate(record, &info, *fps, *quality).await
            }
            PipelineParams::Preview { columns, rows } => {
                self.preview(record, &info, *columns, *rows).await
            }
            PipelineParams::Stream => {
                FileOutcome::Failed("stream runs over the whole worklist".to_string())
            }
        }
    }

    /// Compute and store the target bit rate, logging the change
    fn plan_bit_rate(
        &self,
        record: &mut VideoRecord,
        info: &ProbedInfo,
        width: u32,
        height: u32,
        quality: f64,
    ) -> Result<u64, BuildError> {
        let target = target_bit_rate(width, height, quality)?;
        info!(
            "{} --> {}",
            FileManager::format_bit_rate(info.bit_rate),
            FileManager::format_bit_rate(target)
        );
        record.work.target_bit_rate = Some(target);
        Ok(target)
    }

    fn skip_without_gain(&self, target: u64, info: &ProbedInfo) -> Option<FileOutcome> {
        if should_optimize(target, info.bit_rate, self.config.optimize_tolerance) {
            None
        } else {
            Some(FileOutcome::Skipped(format!(
                "target {} would not shrink source {}",
                FileManager::format_bit_rate(target),
                FileManager::format_bit_rate(info.bit_rate)
            )))
        }
    }

    async fn optimize(&self, record: &mut VideoRecord, info: &ProbedInfo, quality: f64) -> FileOutcome {
        info!("{}x{}", info.width, info.height);
        let target = match self.plan_bit_rate(record, info, info.width, info.height, quality) {
            Ok(target) => target,
            Err(e) => return self.build_failure(record, e),
        };
        if let Some(skipped) = self.skip_without_gain(target, info) {
            return skipped;
        }

        step!(self.run_step(record, PipelineKind::Optimize, Substep::Encode).await);
        FileOutcome::Completed
    }

    async fn resize(
        &self,
        record: &mut VideoRecord,
        info: &ProbedInfo,
        width: i64,
        height: i64,
        quality: f64,
    ) -> FileOutcome {
        let plan = match resize_dimensions(info.width, info.height, width, height) {
            Ok(plan) => plan,
            Err(e) => return self.build_failure(record, e),
        };
        info!("{}x{} --> {}x{}", info.width, info.height, plan.width, plan.height);

        if plan.ratio_changed {
            self.events.warn("Warning, resize ratio will be changed");
            self.events.warn(plan.ratio_change(info.width, info.height));
        }
        if let Some(reason) = plan.skip_reason(info.width, info.height) {
            return FileOutcome::Skipped(reason);
        }

        record.work.resize = Some((plan.width, plan.height));
        let target = match self.plan_bit_rate(record, info, plan.width, plan.height, quality) {
            Ok(target) => target,
            Err(e) => return self.build_failure(record, e),
        };
        if let Some(skipped) = self.skip_without_gain(target, info) {
            return skipped;
        }

        step!(self.run_step(record, PipelineKind::Resize, Substep::Encode).await);
        FileOutcome::Completed
    }

    async fn upscale(
        &self,
        record: &mut VideoRecord,
        info: &ProbedInfo,
        factor: &str,
        quality: f64,
    ) -> FileOutcome {
        let kind = PipelineKind::Upscale;
        let factor: UpscaleFactor = match factor.parse() {
            Ok(factor) => factor,
            Err(e) => return self.build_failure(record, e),
        };
        let (width, height) = (info.width * factor.scale(), info.height * factor.scale());
        info!("{}x{} --> {}x{}", info.width, info.height, width, height);

        if let Err(e) = self.plan_bit_rate(record, info, width, height, quality) {
            return self.build_failure(record, e);
        }
        record.work.upscale_factor = Some(factor);
        let frames_dir = self.paths().frames_dir(record);
        record.work.frames_dir = Some(frames_dir.clone());

        step!(self.extract_frames(record, kind).await);

        let output_dir = self.paths().upscale_dir(record, factor);
        record.work.ai_output_dir = Some(output_dir.clone());
        if fs::try_exists(&output_dir).await.unwrap_or(false) {
            self.events.info("Continue upscaling");
            match reconcile_partial_batch(&frames_dir, &output_dir).await {
                Ok(report) => debug!(
                    "{} frames already upscaled, {} redone",
                    report.moved,
                    report.removed.len()
                ),
                Err(e) => return FileOutcome::Failed(format!("cannot resume upscaling: {}", e)),
            }
        } else {
            self.events.info("New upscaling");
            if let Err(e) = fs::create_dir_all(&output_dir).await {
                return FileOutcome::Failed(e.to_string());
            }
        }

        let expected = frame_count(record);
        step!(self.run_watched_step(record, kind, Substep::Upscale, expected).await);
        self.discard(&frames_dir).await;

        step!(self.run_step(record, kind, Substep::FrameToVideo).await);
        self.discard(&output_dir).await;
        FileOutcome::Completed
    }

    async fn interpolate(
        &self,
        record: &mut VideoRecord,
        info: &ProbedInfo,
        fps: f64,
        quality: f64,
    ) -> FileOutcome {
        let kind = PipelineKind::Interpolate;
        if !fps.is_finite() || fps <= 0.0 {
            return self.build_failure(
                record,
                BuildError::InvalidParameter {
                    name: "fps",
                    reason: format!("{} is not a positive frame rate", fps),
                },
            );
        }
        if fps < info.fps {
            return FileOutcome::Skipped(format!("{} fps is lower than source {} fps", fps, info.fps));
        }

        let frames = (info.duration.as_secs_f64() * fps).ceil() as u64;
        info!("{}fps --> {}fps", info.fps, fps);
        record.work.interpolate_fps = Some(fps);
        record.work.interpolate_frames = Some(frames);

        if let Err(e) = self.plan_bit_rate(record, info, info.width, info.height, quality) {
            return self.build_failure(record, e);
        }
        let frames_dir = self.paths().frames_dir(record);
        record.work.frames_dir = Some(frames_dir.clone());

        step!(self.extract_frames(record, kind).await);

        // interpolation cannot resume: always start from an empty folder
        let output_dir = self.paths().interpolate_dir(record);
        record.work.ai_output_dir = Some(output_dir.clone());
        if let Err(e) = FileManager::remove_tree(&output_dir).await {
            return FileOutcome::Failed(e.to_string());
        }
        if let Err(e) = fs::create_dir_all(&output_dir).await {
            return FileOutcome::Failed(e.to_string());
        }

        step!(self.run_watched_step(record, kind, Substep::Interpolate, frames).await);
        self.discard(&frames_dir).await;

        step!(self.run_step(record, kind, Substep::FrameToVideo).await);
        self.discard(&output_dir).await;
        FileOutcome::Completed
    }

    /// Substep 0, skipped when a previous extraction is still complete
    async fn extract_frames(&self, record: &mut VideoRecord, kind: PipelineKind) -> StepResult {
        let Some(frames_dir) = record.work.frames_dir.clone() else {
            return StepResult::Failed(BuildError::MissingParameter("frames directory").to_string());
        };
        let expected = frame_count(record);

        match frames_ready(&frames_dir, expected).await {
            Ok(FramesState::Ready(_)) => {
                self.events.info("No need to get frames");
                return StepResult::Success;
            }
            Ok(FramesState::Stale(obtained)) => {
                self.events.warn(format!(
                    "Missing frames ({}/{}), regenerate frames needed",
                    obtained, expected
                ));
                if let Err(e) = FileManager::remove_tree(&frames_dir).await {
                    return StepResult::Failed(e.to_string());
                }
            }
            Ok(FramesState::Missing) => {}
            Err(e) => return StepResult::Failed(e.to_string()),
        }

        if let Err(e) = fs::create_dir_all(&frames_dir).await {
            return StepResult::Failed(e.to_string());
        }
        let result = self.run_step(record, kind, Substep::GetFrames).await;

        if result == StepResult::Success {
            let obtained = FileManager::count_entries(&frames_dir).await.unwrap_or(0) as u64;
            if obtained != expected {
                self.events.warn(format!(
                    "Warning, obtained frames {} is not equal to video frames {}",
                    obtained, expected
                ));
                if within_tolerance(obtained, expected) {
                    if let Some(info) = record.info.as_mut() {
                        info.frame_count = obtained;
                    }
                }
            }
        }
        result
    }

    /// Build and run one substep of a per-file pipeline
    async fn run_step(&self, record: &VideoRecord, kind: PipelineKind, substep: Substep) -> StepResult {
        if self.is_cancelled() {
            return StepResult::Stopped;
        }
        match self.builder.build(record, kind, substep) {
            Ok(command) => self.execute(&record.name, kind, substep, &command).await,
            Err(e) => {
                self.events.error(format!("Build error for {}: {}", record.name, e));
                StepResult::Failed(e.to_string())
            }
        }
    }

    /// Run an AI substep while a frame watcher observes its output folder
    async fn run_watched_step(
        &self,
        record: &VideoRecord,
        kind: PipelineKind,
        substep: Substep,
        expected: u64,
    ) -> StepResult {
        let Some(output_dir) = record.work.ai_output_dir.clone() else {
            return StepResult::Failed(BuildError::MissingParameter("AI output directory").to_string());
        };
        let watcher = FrameWatcher::start(
            output_dir,
            expected as usize,
            Duration::from_millis(self.config.poll_interval_ms),
            record.name.clone(),
            self.events.clone(),
        )
        .await;

        let result = self.run_step(record, kind, substep).await;
        let done = watcher.stop().await;
        debug!("{} frames in output after {}", done, substep);
        result
    }

    async fn execute(
        &self,
        name: &str,
        kind: PipelineKind,
        substep: Substep,
        command: &CommandLine,
    ) -> StepResult {
        self.events.emit(PipelineEvent::StepStart {
            name: name.to_string(),
            step: substep,
        });
        let start_time = Instant::now();

        let step_name = format!("{}-{}", kind, substep);
        let result = match self.runner.run_foreground(command, &step_name).await {
            Ok(ProcessOutcome::Completed) => StepResult::Success,
            Ok(ProcessOutcome::Stopped) => StepResult::Stopped,
            Ok(ProcessOutcome::Failed { code }) => {
                StepResult::Failed(format!("{} ended with return code {}", substep, code))
            }
            Ok(ProcessOutcome::Inconclusive) => {
                StepResult::Failed(format!("{} ended without an exit code", substep))
            }
            Err(e) => StepResult::Failed(format!("{} could not start: {}", substep, e)),
        };
        // a kill landing after the process exited still ends the run
        let result = if self.is_cancelled() {
            StepResult::Stopped
        } else {
            result
        };

        self.events.emit(PipelineEvent::StepFinish {
            name: name.to_string(),
            step: substep,
            success: result == StepResult::Success,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        });
        result
    }

    async fn preview(
        &self,
        record: &mut VideoRecord,
        info: &ProbedInfo,
        columns: u32,
        rows: u32,
    ) -> FileOutcome {
        let count = match grid_layout(columns, rows, info.width, info.height) {
            Ok(layout) => layout.cells,
            Err(e) => return self.build_failure(record, e),
        };
        if self.is_cancelled() {
            return FileOutcome::Stopped;
        }

        let offsets = preview_offsets(info.duration.as_secs_f64(), count, self.config.preview_margin);
        let stills_dir = match tempfile::Builder::new()
            .prefix(".stills_")
            .tempdir_in(self.paths().output_dir(PipelineKind::Preview))
        {
            Ok(dir) => dir,
            Err(e) => return FileOutcome::Failed(e.to_string()),
        };

        let stills: Vec<PathBuf> = (0..count)
            .map(|i| stills_dir.path().join(format!("{}.png", i)))
            .collect();
        let commands: Vec<CommandLine> = offsets
            .iter()
            .zip(&stills)
            .map(|(offset, still)| self.builder.build_still(record, *offset, still))
            .collect();

        self.events.emit(PipelineEvent::StepStart {
            name: record.name.clone(),
            step: Substep::Stills,
        });
        let start_time = Instant::now();
        let outputs = self.runner.run_async_batch(&commands).await;

        let outcome = if self.is_cancelled() {
            FileOutcome::Stopped
        } else if let Some(failed) = outputs.iter().position(|o| !o.is_success()) {
            FileOutcome::Failed(format!(
                "still extraction at {:.3}s failed",
                offsets.get(failed).copied().unwrap_or_default()
            ))
        } else {
            let output = self.paths().preview_file(record);
            let (width, height) = (info.width, info.height);
            let composed = tokio::task::spawn_blocking(move || {
                compose_grid(&stills, columns, rows, width, height, &output)
            })
            .await;
            match composed {
                Ok(Ok(())) => FileOutcome::Completed,
                Ok(Err(e)) => FileOutcome::Failed(e.to_string()),
                Err(e) => FileOutcome::Failed(format!("preview task failed: {}", e)),
            }
        };

        info!("Took : {}", crate::utils::format_elapsed(start_time.elapsed()));
        self.events.emit(PipelineEvent::StepFinish {
            name: record.name.clone(),
            step: Substep::Stills,
            success: outcome == FileOutcome::Completed,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        });
        outcome
    }

    /// One remux over every selected record
    async fn run_stream(&self, records: &[VideoRecord], summary: &mut RunSummary) {
        let selected: Vec<&VideoRecord> = records.iter().filter(|r| r.selected).collect();
        info!("{} file(s) selected", selected.len());

        if selected.len() < 2 {
            self.events.warn(BuildError::NotEnoughFiles(selected.len()).to_string());
            return;
        }
        if self.is_cancelled() {
            summary.stopped = true;
            return;
        }

        let reference = selected[0].info.as_ref().map(|i| i.duration);
        for record in &selected {
            info!("{}", record.name);
            if record.info.as_ref().map(|i| i.duration) != reference {
                self.events
                    .warn(format!("Warning, \"{}\" has different duration", record.name));
            }
        }

        let outcome = match self.builder.build_stream(&selected) {
            Ok(command) => {
                match self
                    .execute(&selected[0].name, PipelineKind::Stream, Substep::Remux, &command)
                    .await
                {
                    StepResult::Success => FileOutcome::Completed,
                    StepResult::Failed(reason) => FileOutcome::Failed(reason),
                    StepResult::Stopped => FileOutcome::Stopped,
                }
            }
            Err(e) => {
                self.events.error(format!("Build error: {}", e));
                FileOutcome::Failed(e.to_string())
            }
        };

        summary.stopped = outcome == FileOutcome::Stopped;
        for record in selected {
            self.finish_file(summary, &record.name, outcome.clone());
        }
    }

    fn build_failure(&self, record: &VideoRecord, error: BuildError) -> FileOutcome {
        let error = ScripyError::from(error);
        self.events.error(format!("{}: {}", record.name, error));
        FileOutcome::Failed(error.to_string())
    }

    /// Delete an intermediate folder once the step consuming it succeeded
    async fn discard(&self, dir: &std::path::Path) {
        if let Err(e) = FileManager::remove_tree(dir).await {
            self.events
                .warn(format!("Cannot remove {}: {}", dir.display(), e));
        }
    }
}

/// Expected frame count of a probed record
fn frame_count(record: &VideoRecord) -> u64 {
    record.info.as_ref().map(|i| i.frame_count).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_builder::FRAME_PATTERN;
    use crate::config::{Device, EncoderSettings, VideoCodec};
    use crate::media::{CodecFamily, MediaType, StreamDescriptor};
    use crate::platform::ToolPrograms;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    const MISSING_TOOL: &str = "definitely-not-a-real-tool-42";

    fn programs(ffmpeg: &str, ai: &str) -> ToolPrograms {
        ToolPrograms {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: MISSING_TOOL.to_string(),
            upscaler: ai.to_string(),
            interpolator: ai.to_string(),
        }
    }

    fn engine(
        root: &Path,
        programs: ToolPrograms,
    ) -> (PipelineEngine, Arc<AtomicBool>, UnboundedReceiver<PipelineEvent>) {
        let config = Config {
            poll_interval_ms: 10,
            ..Config::default()
        };
        let encoder = EncoderSettings {
            codec: VideoCodec::H264,
            device: Device::Cpu,
        };
        let builder = CommandBuilder::new(PathResolver::new(root), programs, encoder, 0);
        let runner = Arc::new(ProcessRunner::new(root, &config.exit_code_file_name));
        let cancel = Arc::new(AtomicBool::new(false));
        let (events, rx) = EventSink::channel();
        let engine = PipelineEngine::new(config, builder, runner, events, Arc::clone(&cancel));
        (engine, cancel, rx)
    }

    fn video(root: &Path, name: &str, bit_rate: u64) -> VideoRecord {
        let path = root.join(name);
        std::fs::write(&path, b"").unwrap();
        let mut record =
            VideoRecord::new(path, name.to_string(), "mp4".to_string(), MediaType::Video);
        record.info = Some(ProbedInfo {
            width: 1920,
            height: 1080,
            fps: 30.0,
            duration: Duration::from_secs(10),
            bit_rate,
            frame_count: 10,
            file_size: 0,
            streams: vec![
                StreamDescriptor::new(0, CodecFamily::Video, "h264"),
                StreamDescriptor::new(1, CodecFamily::Audio, "aac"),
            ],
        });
        record
    }

    fn drain(rx: &mut UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn started_steps(events: &[PipelineEvent]) -> Vec<Substep> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StepStart { step, .. } => Some(*step),
                _ => None,
            })
            .collect()
    }

    fn fill(dir: &Path, count: usize) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 1..=count {
            std::fs::write(dir.join(format!("frame{:08}.jpg", i)), b"x").unwrap();
        }
    }

    #[tokio::test]
    async fn test_skip_rules_launch_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, mut rx) = engine(root, programs(MISSING_TOOL, MISSING_TOOL));

        let mut records = vec![
            VideoRecord::new(
                root.join("song.mp3"),
                "song.mp3".to_string(),
                "mp3".to_string(),
                MediaType::Audio,
            ),
            video(root, "low.mp4", 1_000_000),
        ];
        let summary = engine
            .run(&mut records, &PipelineParams::Optimize { quality: 3.0 })
            .await;

        assert_eq!(summary.count("skipped"), 2);
        assert!(!summary.stopped);
        assert_eq!(records[1].work.target_bit_rate, Some(6_220_800));
        assert!(started_steps(&drain(&mut rx)).is_empty());
        // nothing was written, the output folder is cleaned up
        assert!(!root.join("optimize").exists());
    }

    #[tokio::test]
    async fn test_interpolate_below_source_fps_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, _rx) = engine(root, programs(MISSING_TOOL, MISSING_TOOL));

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(&mut records, &PipelineParams::Interpolate { fps: 24.0, quality: 3.0 })
            .await;
        assert!(matches!(summary.outcome_of("a.mp4"), Some(FileOutcome::Skipped(_))));
        assert!(!root.join("a.mp4_tmp_frames").exists());
    }

    #[tokio::test]
    async fn test_bad_upscale_factor_fails_only_that_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, _rx) = engine(root, programs(MISSING_TOOL, MISSING_TOOL));

        let mut records = vec![video(root, "a.mp4", 50_000_000), video(root, "b.mp4", 50_000_000)];
        let summary = engine
            .run(
                &mut records,
                &PipelineParams::Upscale {
                    factor: "5".to_string(),
                    quality: 3.0,
                },
            )
            .await;
        assert_eq!(summary.count("error"), 2);
        assert!(!summary.stopped);
    }

    #[tokio::test]
    async fn test_cancel_before_first_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, cancel, _rx) = engine(root, programs(MISSING_TOOL, MISSING_TOOL));
        cancel.store(true, Ordering::SeqCst);

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(&mut records, &PipelineParams::Optimize { quality: 3.0 })
            .await;
        assert!(summary.stopped);
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_stream_needs_two_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, mut rx) = engine(root, programs(MISSING_TOOL, MISSING_TOOL));

        let mut records = vec![video(root, "a.mp4", 1), video(root, "b.mp4", 1)];
        records[1].selected = false;
        let summary = engine.run(&mut records, &PipelineParams::Stream).await;

        assert!(summary.outcomes.is_empty());
        assert!(!summary.stopped);
        assert!(started_steps(&drain(&mut rx)).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failures_do_not_stop_the_run() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, _rx) = engine(root, programs("false", MISSING_TOOL));

        let mut records = vec![
            video(root, "a.mp4", 50_000_000),
            video(root, "b.mp4", 50_000_000),
            video(root, "c.mp4", 50_000_000),
        ];
        records[2].selected = false;
        let summary = engine
            .run(&mut records, &PipelineParams::Optimize { quality: 3.0 })
            .await;

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.count("error"), 2);
        assert!(summary.outcome_of("c.mp4").is_none());
        assert!(!summary.stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resize_completes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, mut rx) = engine(root, programs("true", MISSING_TOOL));

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(
                &mut records,
                &PipelineParams::Resize {
                    width: -1,
                    height: 720,
                    quality: 3.0,
                },
            )
            .await;

        assert_eq!(summary.outcome_of("a.mp4"), Some(&FileOutcome::Completed));
        assert_eq!(records[0].work.resize, Some((1280, 720)));
        assert_eq!(started_steps(&drain(&mut rx)), vec![Substep::Encode]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upscale_resumes_from_previous_run() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, mut rx) = engine(root, programs("true", "true"));

        let frames_dir = root.join("a.mp4_tmp_frames");
        let output_dir = root.join("a.mp4_upscalex2_frames");
        fill(&frames_dir, 10);
        fill(&output_dir, 4);

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(
                &mut records,
                &PipelineParams::Upscale {
                    factor: "2".to_string(),
                    quality: 3.0,
                },
            )
            .await;

        assert_eq!(summary.outcome_of("a.mp4"), Some(&FileOutcome::Completed));
        let events = drain(&mut rx);
        // extraction reused, the last two upscaled frames were redone
        assert_eq!(
            started_steps(&events),
            vec![Substep::Upscale, Substep::FrameToVideo]
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ProgressStart { already: 2, total: 10, .. })));
        assert!(!frames_dir.exists());
        assert!(!output_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extraction_corrects_frame_count() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        // fake encoder: drops 9 frames next to its last argument
        let script = root.join("fake_ffmpeg.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nfor last; do :; done\ndir=$(dirname \"$last\")\n\
             i=1; while [ $i -le 9 ]; do touch \"$dir/frame$i.jpg\"; i=$((i+1)); done\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (engine, _, _rx) = engine(root, programs(&script.to_string_lossy(), "true"));
        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(
                &mut records,
                &PipelineParams::Upscale {
                    factor: "2".to_string(),
                    quality: 3.0,
                },
            )
            .await;

        assert_eq!(summary.outcome_of("a.mp4"), Some(&FileOutcome::Completed));
        assert_eq!(records[0].info.as_ref().map(|i| i.frame_count), Some(9));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preview_without_stills_fails() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, _rx) = engine(root, programs("true", MISSING_TOOL));

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(&mut records, &PipelineParams::Preview { columns: 2, rows: 2 })
            .await;

        assert!(matches!(summary.outcome_of("a.mp4"), Some(FileOutcome::Failed(_))));
        assert!(!root.join("preview").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_preview_grid_fails_before_extracting() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, mut rx) = engine(root, programs("true", MISSING_TOOL));

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(&mut records, &PipelineParams::Preview { columns: u32::MAX, rows: 2 })
            .await;

        match summary.outcome_of("a.mp4") {
            Some(FileOutcome::Failed(message)) => assert!(message.contains("too large")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(started_steps(&drain(&mut rx)).is_empty());
        assert!(!root.join("preview").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_remux_marks_every_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (engine, _, mut rx) = engine(root, programs("true", MISSING_TOOL));

        let mut records = vec![
            video(root, "a.mp4", 1),
            video(root, "b.mp4", 1),
            video(root, "c.mp4", 1),
        ];
        if let Some(info) = records[1].info.as_mut() {
            info.duration = Duration::from_secs(12);
        }
        let summary = engine.run(&mut records, &PipelineParams::Stream).await;

        assert_eq!(summary.count("completed"), 3);
        let events = drain(&mut rx);
        assert_eq!(started_steps(&events), vec![Substep::Remux]);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Log { message, .. } if message.contains("\"b.mp4\" has different duration")
        )));
    }

    #[cfg(unix)]
    fn script(root: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = root.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Stand-in encoder: logs its arguments, writes 10 frames when the last
    /// argument is a frame pattern (after logging how many were already
    /// there), touches the output file otherwise.
    #[cfg(unix)]
    fn logging_ffmpeg(root: &Path) -> (String, PathBuf) {
        let log = root.join("ffmpeg.log");
        let body = format!(
            r#"echo "$*" >> "{log}"
for last; do :; done
case "$last" in
  *%08d.jpg)
    dir=$(dirname "$last")
    echo "frames-before=$(ls "$dir" | wc -l | tr -d ' ')" >> "{log}"
    i=1; while [ $i -le 10 ]; do touch "$dir/frame$i.jpg"; i=$((i+1)); done ;;
  *) touch "$last" ;;
esac"#,
            log = log.display()
        );
        (script(root, "ffmpeg.sh", &body), log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interpolate_extracts_at_source_fps_and_encodes_at_target() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (ffmpeg, log) = logging_ffmpeg(root);
        let (engine, _, mut rx) = engine(root, programs(&ffmpeg, "true"));

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(
                &mut records,
                &PipelineParams::Interpolate {
                    fps: 60.0,
                    quality: 3.0,
                },
            )
            .await;

        assert_eq!(summary.outcome_of("a.mp4"), Some(&FileOutcome::Completed));
        assert_eq!(records[0].work.interpolate_frames, Some(600));
        assert_eq!(
            started_steps(&drain(&mut rx)),
            vec![Substep::GetFrames, Substep::Interpolate, Substep::FrameToVideo]
        );

        let log = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 3);
        let frames_pattern = root.join("a.mp4_tmp_frames").join(FRAME_PATTERN);
        assert!(lines[0].ends_with(&format!("-r 30 {}", frames_pattern.display())));
        let interpolated = root.join("a.mp4_interpolate_frames").join(FRAME_PATTERN);
        assert!(lines[2].contains(&format!("-r 60 -i {}", interpolated.display())));
        assert!(lines[2].ends_with(&format!("-r 60 -y {}", root.join("interpolate").join("a.mp4").display())));

        assert!(root.join("interpolate").join("a.mp4").exists());
        assert!(!root.join("a.mp4_tmp_frames").exists());
        assert!(!root.join("a.mp4_interpolate_frames").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_frames_are_extracted_again() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (ffmpeg, log) = logging_ffmpeg(root);
        let (engine, _, mut rx) = engine(root, programs(&ffmpeg, "true"));

        // 5 of 10 frames left by an interrupted extraction
        fill(&root.join("a.mp4_tmp_frames"), 5);

        let mut records = vec![video(root, "a.mp4", 50_000_000)];
        let summary = engine
            .run(
                &mut records,
                &PipelineParams::Upscale {
                    factor: "2".to_string(),
                    quality: 3.0,
                },
            )
            .await;

        assert_eq!(summary.outcome_of("a.mp4"), Some(&FileOutcome::Completed));
        let events = drain(&mut rx);
        assert_eq!(
            started_steps(&events),
            vec![Substep::GetFrames, Substep::Upscale, Substep::FrameToVideo]
        );
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Log { message, .. } if message.contains("Missing frames (5/10)")
        )));
        // the stale folder was emptied before the encoder ran
        let log = std::fs::read_to_string(&log).unwrap();
        assert!(log.lines().any(|line| line == "frames-before=0"));
        assert_eq!(records[0].info.as_ref().map(|i| i.frame_count), Some(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_during_upscale_ends_the_run() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let upscaler = script(root, "upscaler.sh", "sleep 30");
        let (engine, cancel, mut rx) = engine(root, programs("true", &upscaler));

        let frames_dir = root.join("a.mp4_tmp_frames");
        fill(&frames_dir, 10);

        let mut records = vec![
            video(root, "a.mp4", 50_000_000),
            video(root, "b.mp4", 50_000_000),
        ];
        let runner = Arc::clone(&engine.runner);
        let canceller = async {
            while !runner.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.store(true, Ordering::SeqCst);
            runner.request_stop();
        };

        let start = Instant::now();
        let params = PipelineParams::Upscale {
            factor: "2".to_string(),
            quality: 3.0,
        };
        let (summary, ()) = tokio::join!(engine.run(&mut records, &params), canceller);

        assert!(start.elapsed() < Duration::from_secs(20));
        assert!(summary.stopped);
        assert_eq!(summary.outcomes, vec![("a.mp4".to_string(), FileOutcome::Stopped)]);

        let events = drain(&mut rx);
        assert_eq!(started_steps(&events), vec![Substep::Upscale]);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::ProgressStop { name, .. } if name == "a.mp4"
        )));
        assert!(!events.iter().any(|e| matches!(
            e,
            PipelineEvent::FileStart { name, .. } | PipelineEvent::StepStart { name, .. } if name == "b.mp4"
        )));
        // partial artifacts stay for the next run
        assert!(frames_dir.exists());
        assert!(!runner.is_running());
    }
}
