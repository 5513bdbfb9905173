//! # Command Builder Module
//!
//! Costruzione deterministica delle invocazioni dei tool esterni.
//!
//! ## Responsabilità:
//! - Modello di bitrate unico: `larghezza * altezza * qualità`
//! - Regola di skip dell'ottimizzazione (tolleranza) e calcolo delle dimensioni di resize
//! - Comandi ffmpeg per optimize/resize, estrazione frame, frame-to-video, still e remux
//! - Comandi dei tool AI (Real-ESRGAN, IFRNet)
//!
//! Nessun side effect: nessun processo viene lanciato, nessun file toccato.
//! Un parametro non riconosciuto è un `BuildError`, fatale solo per il file corrente.
//!
//! ## Esempio:
//! ```rust
//! use video_scripy::command_builder::target_bit_rate;
//!
//! assert_eq!(target_bit_rate(1920, 1080, 3.0).unwrap(), 6_220_800);
//! ```

use std::fmt;
use std::path::Path;

use crate::args;
use crate::config::{Device, EncoderSettings, VideoCodec};
use crate::error::BuildError;
use crate::media::{CodecFamily, PipelineKind, ProbedInfo, Substep, UpscaleFactor, VideoRecord};
use crate::pipeline::path_resolver::PathResolver;
use crate::platform::{quote_posix, quote_windows, ExternalTool, ToolPrograms};
use crate::utils::{aspect_ratio, ceil_even};

/// File name pattern shared by frame extraction, the AI tools and re-encoding
pub const FRAME_PATTERN: &str = "frame%08d.jpg";

/// IFRNet model used for interpolation
pub const INTERPOLATION_MODEL: &str = "IFRNet_GoPro";

/// A program plus its arguments, ready for the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Render as one line for the platform shell, quoting every token
    pub fn to_shell_string(&self) -> String {
        let quote = if cfg!(windows) { quote_windows } else { quote_posix };
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|token| quote(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Target bit rate in bits/s for a frame size and quality factor
pub fn target_bit_rate(width: u32, height: u32, quality: f64) -> Result<u64, BuildError> {
    if !quality.is_finite() || quality <= 0.0 {
        return Err(BuildError::InvalidParameter {
            name: "quality",
            reason: format!("{} is not a positive number", quality),
        });
    }
    Ok((width as f64 * height as f64 * quality).round() as u64)
}

/// Re-encode only when it measurably shrinks the file
pub fn should_optimize(target_bit_rate: u64, source_bit_rate: u64, tolerance: f64) -> bool {
    !(target_bit_rate as f64 * tolerance > source_bit_rate as f64)
}

/// Resolved resize target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub width: u32,
    pub height: u32,
    /// Source and target ratios differ
    pub ratio_changed: bool,
}

impl ResizePlan {
    /// Why this plan must not run, if it must not
    pub fn skip_reason(&self, source_width: u32, source_height: u32) -> Option<String> {
        if self.width == source_width && self.height == source_height {
            Some("target size equals source size".to_string())
        } else if self.width > source_width && self.height > source_height {
            Some("target size is larger than source size".to_string())
        } else {
            None
        }
    }

    /// `16:9 --> 4:3` style description of a ratio change
    pub fn ratio_change(&self, source_width: u32, source_height: u32) -> String {
        let (sw, sh) = aspect_ratio(source_width, source_height);
        let (tw, th) = aspect_ratio(self.width, self.height);
        format!("{}:{} --> {}:{}", sw, sh, tw, th)
    }
}

/// Compute resize dimensions; `-1` derives a side from the other one.
///
/// Both results are rounded up to the next even number.
pub fn resize_dimensions(
    source_width: u32,
    source_height: u32,
    width: i64,
    height: i64,
) -> Result<ResizePlan, BuildError> {
    if source_width == 0 || source_height == 0 {
        return Err(BuildError::InvalidParameter {
            name: "source size",
            reason: format!("{}x{}", source_width, source_height),
        });
    }
    for (name, value) in [("width", width), ("height", height)] {
        if value == 0 {
            return Err(BuildError::InvalidParameter {
                name,
                reason: "must be -1 or a non-zero size".to_string(),
            });
        }
    }

    let (sw, sh) = (source_width as f64, source_height as f64);
    let (target_w, target_h) = match (width, height) {
        (-1, -1) => (sw, sh),
        (-1, h) => ((sw * h as f64 / sh).ceil(), h as f64),
        (w, -1) => (w as f64, (sh * w as f64 / sw).ceil()),
        (w, h) => (w as f64, h as f64),
    };

    let target_w = ceil_even(target_w.abs() as u32);
    let target_h = ceil_even(target_h.abs() as u32);
    let ratio_changed =
        source_width as u64 * target_h as u64 != target_w as u64 * source_height as u64;

    Ok(ResizePlan {
        width: target_w,
        height: target_h,
        ratio_changed,
    })
}

/// Builds command lines from records, pipeline kinds and substeps
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    paths: PathResolver,
    programs: ToolPrograms,
    encoder: EncoderSettings,
    gpu_id: u32,
}

impl CommandBuilder {
    pub fn new(
        paths: PathResolver,
        programs: ToolPrograms,
        encoder: EncoderSettings,
        gpu_id: u32,
    ) -> Self {
        Self {
            paths,
            programs,
            encoder,
            gpu_id,
        }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    fn program(&self, tool: ExternalTool) -> String {
        self.programs.get(tool).to_string()
    }

    /// Encoder name and tuning flags for the configured codec and device
    pub fn encoder_args(&self) -> Vec<String> {
        let mut args = match (self.encoder.device, self.encoder.codec) {
            (Device::Cpu, VideoCodec::H264) => args!["libx264", "-crf", 1],
            (Device::Cpu, VideoCodec::H265) => args!["libx265", "-crf", 0],
            (Device::Cuda, VideoCodec::H264) => args!["h264_nvenc", "-b_ref_mode", "middle"],
            (Device::Cuda, VideoCodec::H265) => args!["hevc_nvenc", "-weighted_pred", 1],
        };
        match self.encoder.device {
            Device::Cpu => args.extend(args!["-preset", "medium"]),
            Device::Cuda => args.extend(args![
                "-preset", "p6", "-tune", "hq", "-rc", "vbr", "-rc-lookahead", 32,
                "-multipass", "fullres", "-spatial_aq", 1, "-cq", 1
            ]),
        }
        args
    }

    fn hwaccel_args(&self) -> Vec<String> {
        if self.encoder.uses_gpu() {
            args!["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"]
        } else {
            Vec::new()
        }
    }

    /// Shared tail: copy every stream, re-encode the first video stream with a bit-rate cap
    fn common_output_args(
        &self,
        record: &VideoRecord,
        kind: PipelineKind,
        fps: f64,
    ) -> Result<Vec<String>, BuildError> {
        let bit_rate = record
            .work
            .target_bit_rate
            .ok_or(BuildError::MissingParameter("target bit rate"))?;

        let mut args = args!["-c:v", "copy", "-c:a", "copy", "-c:s", "copy", "-c:v:0"];
        args.extend(self.encoder_args());
        args.extend(args![
            "-maxrate:v", bit_rate,
            "-bufsize:v", bit_rate * 2,
            "-r", fps,
            "-y",
            self.paths.output_file(kind, record).display()
        ]);
        Ok(args)
    }

    /// Build the command of `substep` of `kind` for one record
    pub fn build(
        &self,
        record: &VideoRecord,
        kind: PipelineKind,
        substep: Substep,
    ) -> Result<CommandLine, BuildError> {
        let info = probed(record)?;

        match (kind, substep) {
            (PipelineKind::Optimize, Substep::Encode) => {
                let mut args = self.hwaccel_args();
                args.extend(args!["-i", record.path.display()]);
                args.extend(args!["-map", "0:v", "-map", "0:a?", "-map", "0:s?"]);
                args.extend(self.common_output_args(record, kind, info.fps)?);
                Ok(CommandLine::new(self.program(ExternalTool::Ffmpeg), args))
            }
            (PipelineKind::Resize, Substep::Encode) => {
                let (width, height) = record
                    .work
                    .resize
                    .ok_or(BuildError::MissingParameter("resize dimensions"))?;
                let filter = if self.encoder.uses_gpu() { "scale_cuda" } else { "scale" };

                let mut args = self.hwaccel_args();
                args.extend(args!["-i", record.path.display()]);
                args.extend(args!["-map", "0:v", "-map", "0:a?", "-map", "0:s?"]);
                args.extend(args!["-filter:v:0", format!("{}={}:{}", filter, width, height)]);
                args.extend(self.common_output_args(record, kind, info.fps)?);
                Ok(CommandLine::new(self.program(ExternalTool::Ffmpeg), args))
            }
            (PipelineKind::Upscale | PipelineKind::Interpolate, Substep::GetFrames) => {
                let frames_dir = record
                    .work
                    .frames_dir
                    .as_ref()
                    .ok_or(BuildError::MissingParameter("frames directory"))?;
                let args = args![
                    "-i", record.path.display(),
                    "-qscale:v", 1, "-qmin", 1, "-qmax", 1,
                    "-y",
                    "-r", info.fps,
                    frames_dir.join(FRAME_PATTERN).display()
                ];
                Ok(CommandLine::new(self.program(ExternalTool::Ffmpeg), args))
            }
            (PipelineKind::Upscale, Substep::Upscale) => {
                let (frames_dir, output_dir) = frame_dirs(record)?;
                let factor = record
                    .work
                    .upscale_factor
                    .ok_or(BuildError::MissingParameter("upscale factor"))?;

                let mut args = args!["-i", frames_dir.display(), "-o", output_dir.display()];
                args.extend(upscale_model_args(factor));
                args.extend(args!["-f", "jpg", "-g", self.gpu_id]);
                Ok(CommandLine::new(self.program(ExternalTool::Upscaler), args))
            }
            (PipelineKind::Interpolate, Substep::Interpolate) => {
                let (frames_dir, output_dir) = frame_dirs(record)?;
                let frames = record
                    .work
                    .interpolate_frames
                    .ok_or(BuildError::MissingParameter("interpolation frame count"))?;

                let args = args![
                    "-i", frames_dir.display(),
                    "-o", output_dir.display(),
                    "-m", INTERPOLATION_MODEL,
                    "-g", self.gpu_id,
                    "-f", FRAME_PATTERN,
                    "-n", frames
                ];
                Ok(CommandLine::new(self.program(ExternalTool::Interpolator), args))
            }
            (PipelineKind::Upscale | PipelineKind::Interpolate, Substep::FrameToVideo) => {
                let output_dir = record
                    .work
                    .ai_output_dir
                    .as_ref()
                    .ok_or(BuildError::MissingParameter("AI output directory"))?;
                let fps = if kind == PipelineKind::Interpolate {
                    record
                        .work
                        .interpolate_fps
                        .ok_or(BuildError::MissingParameter("interpolation fps"))?
                } else {
                    info.fps
                };

                let mut args = self.hwaccel_args();
                args.extend(args!["-i", record.path.display()]);
                if self.encoder.uses_gpu() {
                    args.extend(self.hwaccel_args());
                    args.extend(args!["-c:v", "mjpeg_cuvid"]);
                }
                args.extend(args!["-r", fps, "-i", output_dir.join(FRAME_PATTERN).display()]);
                args.extend(args!["-map", "1:v:0", "-map", "0:a?", "-map", "0:s?"]);
                args.extend(self.common_output_args(record, kind, fps)?);
                Ok(CommandLine::new(self.program(ExternalTool::Ffmpeg), args))
            }
            (PipelineKind::Preview, Substep::Stills) => {
                Err(BuildError::MissingParameter("still time offset"))
            }
            (PipelineKind::Stream, Substep::Remux) => Err(BuildError::NotEnoughFiles(1)),
            (kind, substep) => Err(BuildError::UnknownSubstep {
                kind: kind.name().to_string(),
                substep: substep.name().to_string(),
            }),
        }
    }

    /// One still frame at `offset_secs`, written to `output`
    pub fn build_still(
        &self,
        record: &VideoRecord,
        offset_secs: f64,
        output: &Path,
    ) -> CommandLine {
        let args = args![
            "-ss", format!("{:.3}", offset_secs),
            "-i", record.path.display(),
            "-frames:v", 1,
            "-y",
            output.display()
        ];
        CommandLine::new(self.program(ExternalTool::Ffmpeg), args)
    }

    /// Remux the selected streams of `records` into one mkv.
    ///
    /// Streams are grouped by codec family (video, audio, subtitle, rest), then
    /// by worklist order. Data streams of mp4 inputs are always dropped.
    pub fn build_stream(&self, records: &[&VideoRecord]) -> Result<CommandLine, BuildError> {
        if records.len() < 2 {
            return Err(BuildError::NotEnoughFiles(records.len()));
        }

        let mut inputs = Vec::new();
        for record in records {
            probed(record)?;
            inputs.extend(args!["-i", record.path.display()]);
        }

        let mut maps = Vec::new();
        let mut metadata = Vec::new();
        let mut output_index = 0usize;
        for rank in 0..=3u8 {
            for (file_index, record) in records.iter().enumerate() {
                let Some(info) = record.info.as_ref() else {
                    continue;
                };
                let drop_data = record.extension.eq_ignore_ascii_case("mp4");
                for stream in info
                    .streams
                    .iter()
                    .filter(|s| s.selected && s.family.remux_rank() == rank)
                    .filter(|s| !(drop_data && s.family == CodecFamily::Data))
                {
                    maps.extend(args!["-map", format!("{}:{}", file_index, stream.index)]);
                    let title = stream.effective_title();
                    if !title.is_empty() {
                        metadata.push(format!("-metadata:s:{}", output_index));
                        metadata.push(format!("title={}", title));
                    }
                    let language = stream.effective_language();
                    if !language.is_empty() {
                        metadata.push(format!("-metadata:s:{}", output_index));
                        metadata.push(format!("language={}", language));
                    }
                    output_index += 1;
                }
            }
        }

        if output_index == 0 {
            return Err(BuildError::InvalidParameter {
                name: "streams",
                reason: "no stream selected".to_string(),
            });
        }

        let mut args = inputs;
        args.extend(maps);
        args.extend(args!["-c", "copy"]);
        args.extend(metadata);
        args.extend(args!["-y", self.paths.stream_file(records[0]).display()]);
        Ok(CommandLine::new(self.program(ExternalTool::Ffmpeg), args))
    }

    /// `ffprobe` invocation returning format and streams as JSON
    pub fn build_probe(&self, path: &Path) -> CommandLine {
        let args = args!["-i", path.display(), "-show_format", "-show_streams", "-of", "json"];
        CommandLine::new(self.program(ExternalTool::Ffprobe), args)
    }

    /// Cheap invocation proving a tool can be launched
    pub fn build_tool_check(&self, tool: ExternalTool) -> CommandLine {
        CommandLine::new(
            self.program(tool),
            tool.probe_args().iter().map(|a| a.to_string()).collect(),
        )
    }
}

fn probed(record: &VideoRecord) -> Result<&ProbedInfo, BuildError> {
    record
        .info
        .as_ref()
        .ok_or(BuildError::MissingParameter("probed video info"))
}

fn frame_dirs(record: &VideoRecord) -> Result<(&Path, &Path), BuildError> {
    let frames_dir = record
        .work
        .frames_dir
        .as_deref()
        .ok_or(BuildError::MissingParameter("frames directory"))?;
    let output_dir = record
        .work
        .ai_output_dir
        .as_deref()
        .ok_or(BuildError::MissingParameter("AI output directory"))?;
    Ok((frames_dir, output_dir))
}

/// Real-ESRGAN model flags for an upscale factor
fn upscale_model_args(factor: UpscaleFactor) -> Vec<String> {
    match factor {
        UpscaleFactor::X2 | UpscaleFactor::X3 | UpscaleFactor::X4 => {
            args!["-n", "realesr-animevideov3", "-s", factor.scale()]
        }
        UpscaleFactor::X4Plus => args!["-n", "realesrgan-x4plus"],
        UpscaleFactor::X4PlusAnime => args!["-n", "realesrgan-x4plus-anime"],
    }
}
