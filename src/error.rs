//! # Error Types Module
//!
//! Questo modulo definisce i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - `ScripyError`: errori locali a un singolo file o a una scansione
//! - `BuildError`: errori di costruzione dei comandi (fatali solo per il file corrente)
//!
//! ## Categorie di errori:
//! - `Io`: errori di I/O (directory mancanti, permessi, etc.)
//! - `Json`: output di ffprobe non parsabile
//! - `Image`: errori nella composizione della griglia di preview
//! - `Probe`: campi obbligatori mancanti nei metadata
//! - `Config`: configurazione non valida
//! - `MissingDependency`: tool esterno mancante (ffmpeg, upscaler, etc.)
//! - `Build`: parametro o pipeline non riconosciuti
//!
//! Nessuno di questi errori attraversa il confine engine/UI: l'engine li
//! converte in `FileOutcome::Failed` e continua con il file successivo.

/// Errors raised while scanning, probing or processing a single file
#[derive(thiserror::Error, Debug)]
pub enum ScripyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Command build error: {0}")]
    Build(#[from] BuildError),
}

/// Errors raised by the command builder.
///
/// These never abort a run: the engine marks the current file as failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Unknown video process \"{0}\"")]
    UnknownKind(String),

    #[error("Substep \"{substep}\" is not part of process \"{kind}\"")]
    UnknownSubstep { kind: String, substep: String },

    #[error("Unknown upscale factor \"{0}\"")]
    UnsupportedUpscaleFactor(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{0} file(s) selected, at least 2 are needed")]
    NotEnoughFiles(usize),
}
