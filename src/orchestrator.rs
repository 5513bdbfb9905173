//! # Orchestrator
//!
//! Unico proprietario dello stato di sessione: root corrente, worklist,
//! configurazione, runner dei processi e flag di cancellazione.
//!
//! ## Responsabilità:
//! - `scan`: scansione della root + probe dei metadata
//! - `set_selection` / `set_order`: modifiche della worklist tra un run e l'altro
//! - `run`: esecuzione di un processo sulla worklist corrente
//! - `cancel`: stop cooperativo del run in corso (kill dell'albero di processi)
//! - `check_tools`: verifica che i tool esterni siano lanciabili
//!
//! Il `CancelHandle` è clonabile e può essere usato da un altro task (es.
//! handler di Ctrl-C) mentre `run` è in corso.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::catalog::{MediaCatalog, WorkList};
use crate::command_builder::{CommandBuilder, CommandLine};
use crate::config::Config;
use crate::error::{BuildError, ScripyError};
use crate::events::EventSink;
use crate::media::{PipelineParams, RunSummary};
use crate::pipeline::{PathResolver, PipelineEngine};
use crate::platform::{ExternalTool, PlatformCommands};
use crate::probe::MetadataProbe;
use crate::runner::ProcessRunner;

/// Requests a stop of the running pipeline from another task
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel: Arc<AtomicBool>,
    runner: Arc<ProcessRunner>,
}

impl CancelHandle {
    /// Flag the run, kill whatever process tree is live and block the
    /// next launch if the engine is between two steps
    pub fn cancel(&self) {
        info!("Stop requested");
        self.cancel.store(true, Ordering::SeqCst);
        self.runner.request_stop();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Outcome of a scan + probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Files accepted by the catalog
    pub found: usize,
    /// Files left in the worklist after probing
    pub probed: usize,
    /// Files removed because probing failed
    pub dropped: Vec<String>,
}

/// Availability of one external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub tool: ExternalTool,
    pub program: String,
    pub available: bool,
}

/// Result of `check_tools`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolReport {
    pub tools: Vec<ToolStatus>,
}

impl ToolReport {
    pub fn all_available(&self) -> bool {
        self.tools.iter().all(|t| t.available)
    }

    pub fn missing(&self) -> impl Iterator<Item = &ToolStatus> {
        self.tools.iter().filter(|t| !t.available)
    }

    /// `MissingDependency` naming every tool that could not be launched
    pub fn ensure_available(&self) -> Result<(), ScripyError> {
        let missing: Vec<String> = self
            .missing()
            .map(|t| format!("{} ({})", t.tool, t.program))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ScripyError::MissingDependency(missing.join(", ")))
        }
    }
}

/// Session state shared by every control-surface operation
pub struct Orchestrator {
    catalog: MediaCatalog,
    worklist: WorkList,
    config: Config,
    platform: PlatformCommands,
    runner: Arc<ProcessRunner>,
    cancel: Arc<AtomicBool>,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(root: impl Into<PathBuf>, config: Config, events: EventSink) -> Self {
        let root = root.into();
        let runner = Arc::new(ProcessRunner::new(&root, &config.exit_code_file_name));
        Self {
            catalog: MediaCatalog::new(root, config.clone()),
            worklist: WorkList::default(),
            platform: PlatformCommands::new(&config.tools),
            config,
            runner,
            cancel: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        self.catalog.root()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn worklist(&self) -> &WorkList {
        &self.worklist
    }

    pub fn worklist_mut(&mut self) -> &mut WorkList {
        &mut self.worklist
    }

    /// Change the scan root; the worklist is cleared on success.
    ///
    /// Cancel handles taken before the change no longer reach new runs.
    pub fn set_root(&mut self, path: &str) -> bool {
        if !self.catalog.set_root(path) {
            return false;
        }
        self.worklist = WorkList::default();
        self.runner = Arc::new(ProcessRunner::new(
            self.catalog.root(),
            &self.config.exit_code_file_name,
        ));
        true
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel: Arc::clone(&self.cancel),
            runner: Arc::clone(&self.runner),
        }
    }

    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    fn builder(&self) -> CommandBuilder {
        CommandBuilder::new(
            PathResolver::new(self.catalog.root()),
            self.platform.programs(),
            self.config.encoder,
            self.config.ai_gpu_id,
        )
    }

    /// Rebuild the worklist from disk. Rescanning discards previous edits.
    pub async fn scan(&mut self, depth: Option<i32>) -> ScanSummary {
        let candidates = self
            .catalog
            .scan(depth.unwrap_or(self.config.scan_depth))
            .into_records();
        let found = candidates.len();

        let report = MetadataProbe::probe_all(candidates, &self.builder(), &self.runner).await;
        for name in &report.dropped {
            self.events.warn(format!("Removed {}: metadata unavailable", name));
        }
        self.events
            .info(format!("Get {} video info", report.records.len()));

        let summary = ScanSummary {
            found,
            probed: report.records.len(),
            dropped: report.dropped,
        };
        self.worklist = WorkList::new(report.records);
        summary
    }

    /// Select or unselect a record by display name
    pub fn set_selection(&mut self, name: &str, selected: bool) -> bool {
        match self.worklist.position(name) {
            Some(index) => self.worklist.set_selection(index, selected),
            None => false,
        }
    }

    pub fn set_order(&mut self, names: &[String]) -> Result<(), BuildError> {
        self.worklist.set_order(names)
    }

    /// Run one pipeline over the selected records, in worklist order
    pub async fn run(&mut self, params: PipelineParams) -> RunSummary {
        self.cancel.store(false, Ordering::SeqCst);
        self.runner.reset_kill();

        let engine = PipelineEngine::new(
            self.config.clone(),
            self.builder(),
            Arc::clone(&self.runner),
            self.events.clone(),
            Arc::clone(&self.cancel),
        );
        engine.run(self.worklist.records_mut(), &params).await
    }

    /// Launch every tool once with a harmless argument
    pub async fn check_tools(&self) -> ToolReport {
        let builder = self.builder();
        let commands: Vec<CommandLine> = ExternalTool::ALL
            .iter()
            .map(|tool| builder.build_tool_check(*tool))
            .collect();
        let outputs = self.runner.run_async_batch(&commands).await;

        let tools = ExternalTool::ALL
            .iter()
            .zip(commands)
            .zip(outputs)
            .map(|((tool, command), output)| {
                let available = output.is_success();
                if available {
                    self.events.info(format!("{} found", tool));
                } else {
                    self.events.error(format!("{} not found", tool));
                    if let Err(hint) = self
                        .platform
                        .resolver()
                        .check_tool_with_instructions(self.platform.configured_name(*tool))
                    {
                        info!("{}", hint);
                    }
                }
                ToolStatus {
                    tool: *tool,
                    program: command.program,
                    available,
                }
            })
            .collect();
        ToolReport { tools }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Device, EncoderSettings, ToolsConfig, VideoCodec};
    use crate::media::FileOutcome;
    use tempfile::TempDir;

    const MP4: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "r_frame_rate": "30/1", "duration": "10.0", "bit_rate": "20000000", "nb_frames": "300"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"size": "25000000", "duration": "10.0", "bit_rate": "20000000"}
    }"#;

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn config(tools: ToolsConfig) -> Config {
        Config {
            tools,
            encoder: EncoderSettings {
                codec: VideoCodec::H265,
                device: Device::Cpu,
            },
            poll_interval_ms: 10,
            ..Config::default()
        }
    }

    /// Media root plus a separate folder for the stand-in tools
    #[cfg(unix)]
    fn setup(ffmpeg_body: &str) -> (TempDir, TempDir, Config) {
        let media = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            std::fs::write(media.path().join(name), MP4).unwrap();
        }
        std::fs::write(media.path().join("broken.mp4"), "not json").unwrap();

        let tools = ToolsConfig {
            ffmpeg: script(bin.path(), "ffmpeg.sh", ffmpeg_body),
            ffprobe: script(bin.path(), "ffprobe.sh", "cat \"$2\""),
            upscaler: "true".to_string(),
            interpolator: "true".to_string(),
            tools_dir: None,
        };
        (media, bin, config(tools))
    }

    #[test]
    fn test_selection_by_name_on_empty_worklist() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator =
            Orchestrator::new(temp_dir.path(), config(ToolsConfig::default()), EventSink::disabled());
        assert!(!orchestrator.set_selection("a.mp4", false));
        assert!(orchestrator.set_order(&["a.mp4".to_string()]).is_err());
        assert!(!orchestrator.set_root("/definitely/not/here"));
        assert_eq!(orchestrator.root(), temp_dir.path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_select_order_run() {
        let (media, _bin, config) = setup("exit 0");
        let mut orchestrator = Orchestrator::new(media.path(), config, EventSink::disabled());

        let summary = orchestrator.scan(None).await;
        assert_eq!(summary.found, 4);
        assert_eq!(summary.probed, 3);
        assert_eq!(summary.dropped, vec!["broken.mp4".to_string()]);

        assert!(orchestrator.set_selection("b.mp4", false));
        orchestrator
            .set_order(&["c.mp4".to_string(), "a.mp4".to_string()])
            .unwrap();

        let run = orchestrator.run(PipelineParams::Optimize { quality: 3.0 }).await;
        let names: Vec<&str> = run.outcomes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["c.mp4", "a.mp4"]);
        assert_eq!(run.count("completed"), 2);
        assert!(!run.stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_stops_the_run() {
        let (media, _bin, config) = setup("sleep 30");
        let mut orchestrator = Orchestrator::new(media.path(), config, EventSink::disabled());
        orchestrator.scan(None).await;

        let handle = orchestrator.cancel_handle();
        let runner = Arc::clone(&orchestrator.runner);
        let canceller = async move {
            while !runner.is_running() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            handle.cancel();
        };

        let (run, ()) = tokio::join!(
            orchestrator.run(PipelineParams::Optimize { quality: 3.0 }),
            canceller
        );
        assert!(run.stopped);
        assert_eq!(run.outcomes, vec![("a.mp4".to_string(), FileOutcome::Stopped)]);

        // a later run is not affected by the old cancel
        let (_media, _bin, config) = setup("exit 0");
        orchestrator.config = config.clone();
        orchestrator.platform = PlatformCommands::new(&config.tools);
        let run = orchestrator.run(PipelineParams::Optimize { quality: 3.0 }).await;
        assert!(!run.stopped);
        assert_eq!(run.count("completed"), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_tools() {
        let temp_dir = TempDir::new().unwrap();
        let tools = ToolsConfig {
            ffmpeg: "true".to_string(),
            ffprobe: "true".to_string(),
            upscaler: "true".to_string(),
            interpolator: "definitely-not-a-real-tool-42".to_string(),
            tools_dir: None,
        };
        let orchestrator = Orchestrator::new(temp_dir.path(), config(tools), EventSink::disabled());

        let report = orchestrator.check_tools().await;
        assert_eq!(report.tools.len(), 4);
        assert!(!report.all_available());
        let missing: Vec<ExternalTool> = report.missing().map(|t| t.tool).collect();
        assert_eq!(missing, vec![ExternalTool::Interpolator]);

        match report.ensure_available() {
            Err(ScripyError::MissingDependency(names)) => {
                assert_eq!(names, "IFRNet (definitely-not-a-real-tool-42)");
            }
            other => panic!("unexpected {:?}", other),
        }
        let found = ToolReport {
            tools: report.tools.into_iter().filter(|t| t.available).collect(),
        };
        assert!(found.ensure_available().is_ok());
    }
}
