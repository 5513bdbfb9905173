//! # Metadata Probe Module
//!
//! Lancia `ffprobe` su tutti i candidati in parallelo e normalizza l'output
//! JSON in `ProbedInfo`.
//!
//! ## Regole di estrazione:
//! - Solo il primo stream video viene elaborato (warning se ce ne sono altri)
//! - Il frame rate razionale (`30000/1001`) è ridotto a 2 decimali
//! - Durata e bitrate dallo stream (mp4), altrimenti dal format (mkv)
//! - Numero di frame da `nb_frames`, altrimenti `ceil(durata * fps)`
//! - I file audio/sottotitoli conservano solo stream, durata e dimensione
//!
//! Un file con probe fallito o campi obbligatori mancanti viene rimosso
//! dalla worklist, mai lasciato a metà.

use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::command_builder::{CommandBuilder, CommandLine};
use crate::error::ScripyError;
use crate::media::{CodecFamily, ProbedInfo, StreamDescriptor, VideoRecord};
use crate::runner::ProcessRunner;
use crate::utils::parse_rational;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: ProbeFormat,
}

/// ffprobe reports most numbers as strings
#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    size: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    codec_tag_string: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    #[serde(alias = "LANGUAGE")]
    language: Option<String>,
    #[serde(alias = "TITLE")]
    title: Option<String>,
}

fn number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ScripyError> {
    value.ok_or_else(|| ScripyError::Probe(format!("missing {}", field)))
}

/// Normalize one ffprobe JSON document for `record`
pub fn parse_probe_output(record: &VideoRecord, stdout: &[u8]) -> Result<ProbedInfo, ScripyError> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;

    let streams: Vec<StreamDescriptor> = output
        .streams
        .iter()
        .map(|s| {
            let codec_name = s
                .codec_name
                .clone()
                .or_else(|| s.codec_tag_string.clone())
                .unwrap_or_default();
            let family = CodecFamily::from_codec_type(s.codec_type.as_deref().unwrap_or(""));
            StreamDescriptor::new(s.index, family, codec_name)
                .with_tags(s.tags.language.as_deref(), s.tags.title.as_deref())
        })
        .collect();

    let file_size: u64 = number(output.format.size.as_ref()).unwrap_or(0);
    let format_duration: Option<f64> = number(output.format.duration.as_ref());
    let format_bit_rate: Option<u64> = number(output.format.bit_rate.as_ref());

    if !record.is_video() {
        return Ok(ProbedInfo {
            width: 0,
            height: 0,
            fps: 0.0,
            duration: format_duration
                .and_then(|d| Duration::try_from_secs_f64(d).ok())
                .unwrap_or_default(),
            bit_rate: format_bit_rate.unwrap_or(0),
            frame_count: 0,
            file_size,
            streams,
        });
    }

    let video_streams: Vec<&ProbeStream> = output
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .collect();
    if video_streams.len() > 1 {
        warn!(
            "More than 1 video stream found in \"{}\", only the first will be processed",
            record.name
        );
    }
    let video = required(video_streams.first().copied(), "video stream")?;

    let width = required(video.width, "width")?;
    let height = required(video.height, "height")?;
    let fps = required(
        video.r_frame_rate.as_deref().and_then(parse_rational),
        "frame rate",
    )?;
    if fps <= 0.0 {
        return Err(ScripyError::Probe(format!("invalid frame rate {}", fps)));
    }

    let duration = required(
        number::<f64>(video.duration.as_ref()).or(format_duration),
        "duration",
    )?;
    let duration = Duration::try_from_secs_f64(duration)
        .map_err(|_| ScripyError::Probe(format!("invalid duration {}", duration)))?;
    let bit_rate = required(number(video.bit_rate.as_ref()).or(format_bit_rate), "bit rate")?;
    let frame_count = number(video.nb_frames.as_ref())
        .unwrap_or_else(|| (duration.as_secs_f64() * fps).ceil() as u64);

    Ok(ProbedInfo {
        width,
        height,
        fps,
        duration,
        bit_rate,
        frame_count,
        file_size,
        streams,
    })
}

/// Records that survived probing, plus the names that were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub records: Vec<VideoRecord>,
    pub dropped: Vec<String>,
}

/// Runs the probe tool over a whole scan
pub struct MetadataProbe;

impl MetadataProbe {
    /// Launch every probe at once, then collect and parse the results
    pub async fn probe_all(
        records: Vec<VideoRecord>,
        builder: &CommandBuilder,
        runner: &ProcessRunner,
    ) -> ProbeReport {
        let commands: Vec<CommandLine> = records
            .iter()
            .map(|r| builder.build_probe(&r.path))
            .collect();
        let outputs = runner.run_async_batch(&commands).await;

        let mut report = ProbeReport::default();
        for (mut record, output) in records.into_iter().zip(outputs) {
            if !output.is_success() {
                warn!("FFprobe error, remove {}", record.name);
                report.dropped.push(record.name);
                continue;
            }
            match parse_probe_output(&record, &output.stdout) {
                Ok(info) => {
                    record.info = Some(info);
                    report.records.push(record);
                }
                Err(e) => {
                    warn!("Can not get video info of \"{}\": {}", record.name, e);
                    report.dropped.push(record.name);
                }
            }
        }

        info!("Get {} video info", report.records.len());
        if !report.dropped.is_empty() {
            warn!("{} file(s) removed from the list", report.dropped.len());
        }
        report
    }
}
