//! # Media Catalog Module
//!
//! Scansione della root e gestione della worklist ordinata.
//!
//! ## Responsabilità:
//! - Scansione ricorsiva con limite di profondità (`0` = solo top-level, `-1` = illimitata)
//! - Esclusione delle cartelle di output generate dai processi
//! - Filtro per estensione e rifiuto dei path con il carattere riservato
//! - Ordinamento, selezione e modifica degli stream della worklist
//!
//! L'ordine della worklist è l'ordine di elaborazione e l'ordine degli
//! stream nel remux.

use std::cmp::Ordering;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::BuildError;
use crate::file_manager::FileManager;
use crate::media::{CodecFamily, PipelineKind, StreamDescriptor, VideoRecord};

/// Scans one root directory into a worklist
#[derive(Debug, Clone)]
pub struct MediaCatalog {
    root: PathBuf,
    config: Config,
}

impl MediaCatalog {
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Change the scan root. Empty input means the current directory.
    ///
    /// The root is left untouched when `path` is not a directory.
    pub fn set_root(&mut self, path: &str) -> bool {
        if path.trim().is_empty() {
            return match env::current_dir() {
                Ok(cwd) => {
                    info!("Path set to default \"{}\"", cwd.display());
                    self.root = cwd;
                    true
                }
                Err(e) => {
                    warn!("Cannot read current directory: {}", e);
                    false
                }
            };
        }

        let candidate = PathBuf::from(path);
        if candidate.is_dir() {
            info!("Path correctly set to \"{}\"", candidate.display());
            self.root = candidate;
            true
        } else {
            warn!("Path \"{}\" does not exist", path);
            false
        }
    }

    /// Walk the root and collect candidate files, sorted by display name.
    ///
    /// `depth` counts folders below the root: `0` keeps only top-level files,
    /// `-1` walks everything.
    pub fn scan(&self, depth: i32) -> WorkList {
        let reserved: Vec<&str> = PipelineKind::reserved_folder_names().collect();
        let mut walker = WalkDir::new(&self.root).follow_links(false);
        if depth >= 0 {
            walker = walker.max_depth(depth as usize + 1);
        }

        let mut records = Vec::new();
        let entries = walker.into_iter().filter_entry(|entry| {
            let skip = entry.depth() > 0
                && entry.file_type().is_dir()
                && reserved.contains(&entry.file_name().to_string_lossy().as_ref());
            if skip {
                info!(
                    "Self generated folder \"{}\" skipped",
                    entry.file_name().to_string_lossy()
                );
            }
            !skip
        });

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(media_type) = FileManager::classify(path, &self.config) else {
                continue;
            };
            let name = FileManager::display_name(&self.root, path);

            if path.to_string_lossy().contains(self.config.reserved_char) {
                warn!(
                    "\"{}\" must not be used in path or file name",
                    self.config.reserved_char
                );
                warn!("Skipped \"{}\"", name);
                continue;
            }

            let extension = FileManager::extension(path).unwrap_or_default();
            debug!("Found {:?} {}", media_type, name);
            records.push(VideoRecord::new(path.to_path_buf(), name, extension, media_type));
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        info!("Found {} file(s) in {}", records.len(), self.root.display());
        WorkList::new(records)
    }
}

/// Scalar attributes the worklist can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Width,
    Height,
    /// width x height
    Area,
    Fps,
    Duration,
    BitRate,
    FileSize,
}

impl SortKey {
    pub const ALL: [SortKey; 8] = [
        Self::Name,
        Self::Width,
        Self::Height,
        Self::Area,
        Self::Fps,
        Self::Duration,
        Self::BitRate,
        Self::FileSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Width => "width",
            Self::Height => "height",
            Self::Area => "area",
            Self::Fps => "fps",
            Self::Duration => "duration",
            Self::BitRate => "bitrate",
            Self::FileSize => "filesize",
        }
    }

    fn compare(&self, a: &VideoRecord, b: &VideoRecord) -> Ordering {
        if *self == Self::Name {
            return a.name.cmp(&b.name);
        }
        let value = |record: &VideoRecord| -> f64 {
            let Some(info) = record.info.as_ref() else {
                return 0.0;
            };
            match self {
                Self::Name => 0.0,
                Self::Width => info.width as f64,
                Self::Height => info.height as f64,
                Self::Area => info.width as f64 * info.height as f64,
                Self::Fps => info.fps,
                Self::Duration => info.duration.as_secs_f64(),
                Self::BitRate => info.bit_rate as f64,
                Self::FileSize => info.file_size as f64,
            }
        };
        value(a).total_cmp(&value(b))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortKey {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['_', ' '], "");
        match key.as_str() {
            "wxh" => Ok(Self::Area),
            "size" => Ok(Self::FileSize),
            _ => Self::ALL
                .iter()
                .copied()
                .find(|k| k.name() == key)
                .ok_or_else(|| BuildError::InvalidParameter {
                    name: "sort",
                    reason: format!("unknown sort key \"{}\"", s),
                }),
        }
    }
}

/// Ordered records with their selection state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkList {
    records: Vec<VideoRecord>,
}

impl WorkList {
    pub fn new(records: Vec<VideoRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[VideoRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [VideoRecord] {
        &mut self.records
    }

    pub fn into_records(self) -> Vec<VideoRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| r.name == name)
    }

    pub fn selected(&self) -> impl Iterator<Item = &VideoRecord> {
        self.records.iter().filter(|r| r.selected)
    }

    /// Stable sort by one scalar attribute
    pub fn sort_by(&mut self, key: SortKey) {
        self.records.sort_by(|a, b| key.compare(a, b));
        info!("Sort by {}", key);
    }

    pub fn reverse(&mut self) {
        self.records.reverse();
        info!("Reverse video list");
    }

    /// Move the record at `from` so that it ends up at `to`
    pub fn move_record(&mut self, from: usize, to: usize) -> bool {
        if from >= self.records.len() || to >= self.records.len() {
            return false;
        }
        let record = self.records.remove(from);
        self.records.insert(to, record);
        true
    }

    /// Put the named records first, in the given order.
    ///
    /// Records not named keep their relative order after them.
    pub fn set_order(&mut self, names: &[String]) -> Result<(), BuildError> {
        for name in names {
            if self.position(name).is_none() {
                return Err(BuildError::InvalidParameter {
                    name: "order",
                    reason: format!("\"{}\" is not in the worklist", name),
                });
            }
        }

        let rank = |record: &VideoRecord| {
            names
                .iter()
                .position(|n| *n == record.name)
                .unwrap_or(names.len())
        };
        self.records.sort_by_key(rank);
        Ok(())
    }

    pub fn set_selection(&mut self, index: usize, selected: bool) -> bool {
        match self.records.get_mut(index) {
            Some(record) => {
                record.selected = selected;
                if selected {
                    info!("Selected {}", record.name);
                } else {
                    info!("Unselected {}", record.name);
                }
                true
            }
            None => false,
        }
    }

    pub fn select_all(&mut self) {
        self.records.iter_mut().for_each(|r| r.selected = true);
    }

    pub fn select_none(&mut self) {
        self.records.iter_mut().for_each(|r| r.selected = false);
    }

    pub fn invert_selection(&mut self) {
        self.records.iter_mut().for_each(|r| r.selected = !r.selected);
    }

    /// Keep only the named records selected
    pub fn select_only(&mut self, names: &[String]) {
        for record in &mut self.records {
            record.selected = names.iter().any(|n| *n == record.name);
        }
    }

    fn stream_mut(
        &mut self,
        record: usize,
        stream: usize,
    ) -> Option<&mut StreamDescriptor> {
        self.records
            .get_mut(record)?
            .info
            .as_mut()?
            .streams
            .get_mut(stream)
    }

    /// Flip one stream's remux selection; returns the new state
    pub fn toggle_stream(&mut self, record: usize, stream: usize) -> Option<bool> {
        let stream = self.stream_mut(record, stream)?;
        stream.selected = !stream.selected;
        Some(stream.selected)
    }

    /// Flip the selection of every stream of one codec family
    pub fn invert_family(&mut self, family: CodecFamily) {
        for info in self.records.iter_mut().filter_map(|r| r.info.as_mut()) {
            for stream in info.streams.iter_mut().filter(|s| s.family == family) {
                stream.selected = !stream.selected;
            }
        }
    }

    pub fn set_stream_title(&mut self, record: usize, stream: usize, title: &str) -> bool {
        match self.stream_mut(record, stream) {
            Some(stream) => {
                stream.title = title.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_stream_language(&mut self, record: usize, stream: usize, language: &str) -> bool {
        match self.stream_mut(record, stream) {
            Some(stream) => {
                stream.language = language.to_string();
                true
            }
            None => false,
        }
    }

    /// Title every selected stream of every selected record with its display name
    pub fn reset_titles(&mut self) {
        for record in self.records.iter_mut().filter(|r| r.selected) {
            let name = record.name.clone();
            if let Some(info) = record.info.as_mut() {
                for stream in info.streams.iter_mut().filter(|s| s.selected) {
                    stream.title = name.clone();
                }
            }
        }
    }

    /// `(position, name)` of the selected records, counting from 1
    pub fn processing_order(&self) -> Vec<(usize, &str)> {
        self.selected()
            .enumerate()
            .map(|(i, r)| (i + 1, r.name.as_str()))
            .collect()
    }
}
