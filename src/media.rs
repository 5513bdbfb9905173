//! # Media Data Model
//!
//! Tipi condivisi tra catalogo, probe, builder ed engine.
//!
//! ## Strutture dati:
//! - `VideoRecord`: una voce della worklist (identità, attributi probe, parametri di lavoro)
//! - `StreamDescriptor`: uno stream elementare dentro un container
//! - `PipelineKind` / `Substep`: le pipeline disponibili e i loro sotto-step ordinati
//! - `PipelineParams`: parametri utente specifici di ogni pipeline
//! - `FileOutcome` / `RunSummary`: esito per file e riepilogo del run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::BuildError;

/// Closed set of scanned file types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// Codec family of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFamily {
    Video,
    Audio,
    Subtitle,
    /// Data/timecode tracks (`tmcd` in mp4)
    Data,
    Other,
}

impl CodecFamily {
    pub fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "subtitle" => Self::Subtitle,
            "data" => Self::Data,
            _ => Self::Other,
        }
    }

    /// Output ordering used by the remux: video, audio, subtitle, then the rest
    pub fn remux_rank(&self) -> u8 {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
            Self::Subtitle => 2,
            Self::Data | Self::Other => 3,
        }
    }
}

/// Language tag used when the container carries none
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// One elementary stream inside a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Position within the container
    pub index: u32,
    pub family: CodecFamily,
    pub codec_name: String,
    /// Include in a remux
    pub selected: bool,
    /// User-editable language (blank = keep the container tag)
    pub language: String,
    /// User-editable title (blank = keep the container tag)
    pub title: String,
    /// Tags as read from the container
    pub tag_language: String,
    pub tag_title: String,
}

impl StreamDescriptor {
    pub fn new(index: u32, family: CodecFamily, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            family,
            codec_name: codec_name.into(),
            selected: true,
            language: UNDETERMINED_LANGUAGE.to_string(),
            title: String::new(),
            tag_language: UNDETERMINED_LANGUAGE.to_string(),
            tag_title: String::new(),
        }
    }

    pub fn with_tags(mut self, language: Option<&str>, title: Option<&str>) -> Self {
        if let Some(language) = language.filter(|l| !l.trim().is_empty()) {
            self.tag_language = language.to_string();
            self.language = language.to_string();
        }
        if let Some(title) = title {
            self.tag_title = title.to_string();
            self.title = title.to_string();
        }
        self
    }

    /// Title written in a remux: user value, falling back to the container tag
    pub fn effective_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.tag_title
        } else {
            &self.title
        }
    }

    pub fn effective_language(&self) -> &str {
        if self.language.trim().is_empty() {
            &self.tag_language
        } else {
            &self.language
        }
    }
}

/// Parametri di lavoro calcolati dall'engine durante un run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkParams {
    pub target_bit_rate: Option<u64>,
    pub resize: Option<(u32, u32)>,
    pub upscale_factor: Option<UpscaleFactor>,
    pub interpolate_fps: Option<f64>,
    pub interpolate_frames: Option<u64>,
    /// `<name>_tmp_frames`
    pub frames_dir: Option<PathBuf>,
    /// `<name>_upscalex<f>_frames` or `<name>_interpolate_frames`
    pub ai_output_dir: Option<PathBuf>,
}

/// Attributes filled by the probe; present only for probed, valid files
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedInfo {
    pub width: u32,
    pub height: u32,
    /// Reduced to 2 decimals
    pub fps: f64,
    pub duration: Duration,
    pub bit_rate: u64,
    /// Derived, may be corrected after frame extraction
    pub frame_count: u64,
    pub file_size: u64,
    pub streams: Vec<StreamDescriptor>,
}

/// One entry in the worklist
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub path: PathBuf,
    /// Root-relative name with separators flattened to `__`
    pub name: String,
    /// Lower-case extension
    pub extension: String,
    pub media_type: MediaType,
    pub info: Option<ProbedInfo>,
    pub work: WorkParams,
    pub selected: bool,
}

impl VideoRecord {
    pub fn new(path: PathBuf, name: String, extension: String, media_type: MediaType) -> Self {
        Self {
            path,
            name,
            extension,
            media_type,
            info: None,
            work: WorkParams::default(),
            selected: true,
        }
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    /// Display name without its extension
    pub fn stem(&self) -> &str {
        self.name
            .strip_suffix(&format!(".{}", self.extension))
            .unwrap_or(&self.name)
    }
}

/// Processi implementati
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Optimize,
    Resize,
    Upscale,
    Interpolate,
    Preview,
    Stream,
}

/// Step of a pipeline; each kind owns an ordered list of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Substep {
    Encode,
    GetFrames,
    Upscale,
    Interpolate,
    FrameToVideo,
    Stills,
    Remux,
}

impl Substep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Encode => "encode",
            Self::GetFrames => "getFrames",
            Self::Upscale => "upscale",
            Self::Interpolate => "interpolate",
            Self::FrameToVideo => "frameToVideo",
            Self::Stills => "stills",
            Self::Remux => "remux",
        }
    }
}

impl fmt::Display for Substep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 6] = [
        Self::Optimize,
        Self::Resize,
        Self::Upscale,
        Self::Interpolate,
        Self::Preview,
        Self::Stream,
    ];

    const OPTIMIZE_STEPS: &'static [Substep] = &[Substep::Encode];
    const RESIZE_STEPS: &'static [Substep] = &[Substep::Encode];
    const UPSCALE_STEPS: &'static [Substep] =
        &[Substep::GetFrames, Substep::Upscale, Substep::FrameToVideo];
    const INTERPOLATE_STEPS: &'static [Substep] =
        &[Substep::GetFrames, Substep::Interpolate, Substep::FrameToVideo];
    const PREVIEW_STEPS: &'static [Substep] = &[Substep::Stills];
    const STREAM_STEPS: &'static [Substep] = &[Substep::Remux];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Optimize => "optimize",
            Self::Resize => "resize",
            Self::Upscale => "upscale",
            Self::Interpolate => "interpolate",
            Self::Preview => "preview",
            Self::Stream => "stream",
        }
    }

    pub fn substeps(&self) -> &'static [Substep] {
        match self {
            Self::Optimize => Self::OPTIMIZE_STEPS,
            Self::Resize => Self::RESIZE_STEPS,
            Self::Upscale => Self::UPSCALE_STEPS,
            Self::Interpolate => Self::INTERPOLATE_STEPS,
            Self::Preview => Self::PREVIEW_STEPS,
            Self::Stream => Self::STREAM_STEPS,
        }
    }

    /// Output folder names, skipped when scanning
    pub fn reserved_folder_names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(|k| k.name())
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PipelineKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BuildError::UnknownKind(s.to_string()))
    }
}

/// Upscale model selection. `4p`/`4pa` use the x4plus models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpscaleFactor {
    X2,
    X3,
    X4,
    X4Plus,
    X4PlusAnime,
}

impl UpscaleFactor {
    /// Size multiplier applied to both dimensions
    pub fn scale(&self) -> u32 {
        match self {
            Self::X2 => 2,
            Self::X3 => 3,
            Self::X4 | Self::X4Plus | Self::X4PlusAnime => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::X2 => "2",
            Self::X3 => "3",
            Self::X4 => "4",
            Self::X4Plus => "4p",
            Self::X4PlusAnime => "4pa",
        }
    }
}

impl FromStr for UpscaleFactor {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2" => Ok(Self::X2),
            "3" => Ok(Self::X3),
            "4" => Ok(Self::X4),
            "4p" => Ok(Self::X4Plus),
            "4pa" => Ok(Self::X4PlusAnime),
            other => Err(BuildError::UnsupportedUpscaleFactor(other.to_string())),
        }
    }
}

/// User parameters, one variant per pipeline kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PipelineParams {
    Optimize { quality: f64 },
    /// `-1` derives the dimension from the other one
    Resize { width: i64, height: i64, quality: f64 },
    /// Raw factor as entered: `2`, `3`, `4`, `4p` or `4pa`
    Upscale { factor: String, quality: f64 },
    Interpolate { fps: f64, quality: f64 },
    Preview { columns: u32, rows: u32 },
    Stream,
}

impl PipelineParams {
    pub fn kind(&self) -> PipelineKind {
        match self {
            Self::Optimize { .. } => PipelineKind::Optimize,
            Self::Resize { .. } => PipelineKind::Resize,
            Self::Upscale { .. } => PipelineKind::Upscale,
            Self::Interpolate { .. } => PipelineKind::Interpolate,
            Self::Preview { .. } => PipelineKind::Preview,
            Self::Stream => PipelineKind::Stream,
        }
    }
}

/// Final state of one file in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum FileOutcome {
    Completed,
    Skipped(String),
    Failed(String),
    /// Killed by the user; terminal for the whole run
    Stopped,
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "error",
            Self::Stopped => "aborted",
        }
    }
}

/// Result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub kind: PipelineKind,
    /// (display name, outcome) in processing order
    pub outcomes: Vec<(String, FileOutcome)>,
    pub stopped: bool,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            kind,
            outcomes: Vec::new(),
            stopped: false,
            elapsed_secs: 0.0,
        }
    }

    pub fn outcome_of(&self, name: &str) -> Option<&FileOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substeps_per_kind() {
        assert_eq!(
            PipelineKind::Upscale.substeps(),
            &[Substep::GetFrames, Substep::Upscale, Substep::FrameToVideo]
        );
        assert_eq!(PipelineKind::Interpolate.substeps()[1], Substep::Interpolate);
        assert_eq!(PipelineKind::Optimize.substeps(), &[Substep::Encode]);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Resize".parse::<PipelineKind>(), Ok(PipelineKind::Resize));
        assert_eq!(
            "merge".parse::<PipelineKind>(),
            Err(BuildError::UnknownKind("merge".to_string()))
        );
    }

    #[test]
    fn test_upscale_factor_parse() {
        assert_eq!("4pa".parse::<UpscaleFactor>().map(|f| f.scale()), Ok(4));
        assert_eq!("3".parse::<UpscaleFactor>(), Ok(UpscaleFactor::X3));
        assert!(matches!(
            "5".parse::<UpscaleFactor>(),
            Err(BuildError::UnsupportedUpscaleFactor(_))
        ));
    }

    #[test]
    fn test_stream_fallback_to_tags() {
        let mut stream = StreamDescriptor::new(1, CodecFamily::Audio, "aac")
            .with_tags(Some("jpn"), Some("Original"));
        assert_eq!(stream.effective_title(), "Original");

        stream.title = "  ".to_string();
        stream.language = String::new();
        assert_eq!(stream.effective_title(), "Original");
        assert_eq!(stream.effective_language(), "jpn");

        stream.title = "Commentary".to_string();
        assert_eq!(stream.effective_title(), "Commentary");
    }

    #[test]
    fn test_stream_defaults_without_tags() {
        let stream = StreamDescriptor::new(0, CodecFamily::Video, "h264").with_tags(None, None);
        assert!(stream.selected);
        assert_eq!(stream.language, UNDETERMINED_LANGUAGE);
        assert_eq!(stream.title, "");
    }

    #[test]
    fn test_record_stem() {
        let record = VideoRecord::new(
            PathBuf::from("/v/sub/clip.mp4"),
            "sub__clip.mp4".to_string(),
            "mp4".to_string(),
            MediaType::Video,
        );
        assert_eq!(record.stem(), "sub__clip");
    }
}
