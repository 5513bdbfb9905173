//! # Pipeline Event Stream
//!
//! Questo modulo definisce il flusso di eventi strutturati che l'engine
//! pubblica verso il chiamante (CLI, UI, altri processi).
//!
//! ## Responsabilità:
//! - Eventi tipizzati per inizio/fine run, file, step e progresso frame
//! - Righe di log narrative (skip, probe falliti, tempi) come eventi
//! - Serializzazione JSON una-riga-per-evento per comunicazione inter-processo
//!
//! ## Tipi di messaggi (`type`):
//! - `run_start` / `run_finish`: inizio e riepilogo del run
//! - `file_start` / `file_finish`: inizio ed esito di un file
//! - `step_start` / `step_finish`: sotto-step con esito e tempo impiegato
//! - `progress_start` / `progress_tick` / `progress_stop`: conteggio frame dei tool AI
//! - `log`: riga di log per il pannello testuale

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::media::{FileOutcome, PipelineKind, RunSummary, Substep};

/// Severity of a narrated log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Tipo di evento pubblicato dall'engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStart {
        kind: PipelineKind,
        total_files: usize,
    },
    FileStart {
        name: String,
        index: usize,
        total: usize,
    },
    StepStart {
        name: String,
        step: Substep,
    },
    StepFinish {
        name: String,
        step: Substep,
        success: bool,
        elapsed_seconds: f64,
    },
    /// Frame watcher started; `already` frames existed from an earlier run
    ProgressStart {
        name: String,
        already: usize,
        total: usize,
    },
    ProgressTick {
        name: String,
        done: usize,
        total: usize,
    },
    ProgressStop {
        name: String,
        done: usize,
        total: usize,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    FileFinish {
        name: String,
        #[serde(flatten)]
        outcome: FileOutcome,
    },
    RunFinish {
        summary: RunSummary,
    },
}

impl PipelineEvent {
    /// One JSON line, the wire format of `--json` mode
    pub fn to_json_line(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Some(json) = self.to_json_line() {
            println!("{}", json);
        }
    }
}

/// Sending half of the event stream; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    /// Sink plus the receiver the caller renders from
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Publish an event; a closed receiver is not an error
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Log through tracing and publish the same line as an event
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.emit(PipelineEvent::Log { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}
