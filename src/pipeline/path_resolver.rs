//! # Path Resolution Module
//!
//! Centralizza tutta la logica di calcolo dei path di output e delle
//! directory di lavoro per-file. Evita duplicazione tra builder ed engine.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::media::{PipelineKind, UpscaleFactor, VideoRecord};

/// Utility per calcolare i path relativi alla root di scansione
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output folder of a pipeline kind: `<root>/<kind>`
    pub fn output_dir(&self, kind: PipelineKind) -> PathBuf {
        self.root.join(kind.name())
    }

    /// Output file of a per-file pipeline: `<root>/<kind>/<display name>`
    pub fn output_file(&self, kind: PipelineKind, record: &VideoRecord) -> PathBuf {
        self.output_dir(kind).join(&record.name)
    }

    /// Preview grid: `<root>/preview/<stem>.png`
    pub fn preview_file(&self, record: &VideoRecord) -> PathBuf {
        self.output_dir(PipelineKind::Preview)
            .join(format!("{}.png", record.stem()))
    }

    /// Remux output: `<root>/stream/<stem of the first file>.mkv`
    pub fn stream_file(&self, first: &VideoRecord) -> PathBuf {
        self.output_dir(PipelineKind::Stream)
            .join(format!("{}.mkv", first.stem()))
    }

    /// Extracted source frames: `<root>/<name>_tmp_frames`
    pub fn frames_dir(&self, record: &VideoRecord) -> PathBuf {
        self.root.join(format!("{}_tmp_frames", record.name))
    }

    /// Upscaled frames: `<root>/<name>_upscalex<factor>_frames`
    pub fn upscale_dir(&self, record: &VideoRecord, factor: UpscaleFactor) -> PathBuf {
        self.root.join(format!(
            "{}_{}x{}_frames",
            record.name,
            PipelineKind::Upscale.name(),
            factor.label()
        ))
    }

    /// Interpolated frames: `<root>/<name>_interpolate_frames`
    pub fn interpolate_dir(&self, record: &VideoRecord) -> PathBuf {
        self.root.join(format!(
            "{}_{}_frames",
            record.name,
            PipelineKind::Interpolate.name()
        ))
    }

    /// Crea la directory se necessario
    pub async fn ensure_dir(path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to create directory {}: {}", path.display(), e)
        })?;
        debug!("Directory ready: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;

    fn record() -> VideoRecord {
        VideoRecord::new(
            PathBuf::from("/v/s1/clip.mp4"),
            "s1__clip.mp4".to_string(),
            "mp4".to_string(),
            MediaType::Video,
        )
    }

    #[test]
    fn test_working_dirs() {
        let paths = PathResolver::new("/v");
        let record = record();
        assert_eq!(paths.frames_dir(&record), PathBuf::from("/v/s1__clip.mp4_tmp_frames"));
        assert_eq!(
            paths.upscale_dir(&record, UpscaleFactor::X4PlusAnime),
            PathBuf::from("/v/s1__clip.mp4_upscalex4pa_frames")
        );
        assert_eq!(
            paths.interpolate_dir(&record),
            PathBuf::from("/v/s1__clip.mp4_interpolate_frames")
        );
    }

    #[test]
    fn test_outputs() {
        let paths = PathResolver::new("/v");
        let record = record();
        assert_eq!(
            paths.output_file(PipelineKind::Optimize, &record),
            PathBuf::from("/v/optimize/s1__clip.mp4")
        );
        assert_eq!(paths.preview_file(&record), PathBuf::from("/v/preview/s1__clip.png"));
        assert_eq!(paths.stream_file(&record), PathBuf::from("/v/stream/s1__clip.mkv"));
    }
}
