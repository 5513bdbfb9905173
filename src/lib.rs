//! # Video Scripy Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per diverse operazioni
//! - `media`: Modello dati (record, stream, processi, esiti)
//! - `file_manager`: Classificazione file e gestione directory
//! - `catalog`: Scansione della root e worklist
//! - `probe`: Lettura dei metadata con ffprobe
//! - `command_builder`: Costruzione deterministica delle command line
//! - `runner`: Esecuzione dei processi esterni, exit code e kill
//! - `pipeline`: Engine dei processi, frame watcher, resume e preview
//! - `orchestrator`: Stato di sessione e operazioni della UI
//! - `events`: Flusso di eventi strutturati
//! - `progress`: Progress bar e statistiche
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use video_scripy::{Config, EventSink, Orchestrator, PipelineParams};
//!
//! # async fn demo() {
//! let mut orchestrator = Orchestrator::new(".", Config::default(), EventSink::disabled());
//! orchestrator.scan(None).await;
//! let summary = orchestrator.run(PipelineParams::Optimize { quality: 3.0 }).await;
//! # }
//! ```

pub mod catalog;
pub mod command_builder;
pub mod config;
pub mod error;
pub mod events;
pub mod file_manager;
pub mod media;
pub mod orchestrator;
pub mod pipeline;
pub mod platform;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod tool_resolver;
pub mod utils;

pub use catalog::{MediaCatalog, SortKey, WorkList};
pub use command_builder::{CommandBuilder, CommandLine};
pub use config::Config;
pub use error::{BuildError, ScripyError};
pub use events::{EventSink, PipelineEvent};
pub use media::{FileOutcome, PipelineKind, PipelineParams, RunSummary, VideoRecord};
pub use orchestrator::{CancelHandle, Orchestrator, ToolReport};
pub use runner::{ProcessOutcome, ProcessRunner};
