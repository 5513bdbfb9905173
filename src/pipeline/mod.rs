//! # Pipeline Module
//!
//! Esecuzione dei processi video, separata in sottomoduli:
//! - `engine`: Macchina a stati del run, un file alla volta
//! - `frame_watcher`: Progress dei tool AI osservando la directory di output
//! - `resume`: Riconciliazione degli artefatti di un run interrotto
//! - `preview`: Istanti dei fotogrammi e composizione della griglia
//! - `path_resolver`: Logica di calcolo path centralizzata

pub mod engine;
pub mod frame_watcher;
pub mod path_resolver;
pub mod preview;
pub mod resume;

pub use engine::PipelineEngine;
pub use frame_watcher::FrameWatcher;
pub use path_resolver::PathResolver;
