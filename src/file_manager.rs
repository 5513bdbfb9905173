//! # File Management Module
//!
//! Operazioni sui file condivise da catalogo ed engine.
//!
//! ## Responsabilità:
//! - Classificazione dei file per estensione (video, audio, sottotitoli)
//! - Costruzione del nome display "piatto" relativo alla root di scansione
//! - Conteggio delle entry di una directory (segnale di progresso dei tool AI)
//! - Rimozione di directory vuote o temporanee a fine step
//! - Formattazione human-readable di dimensioni e bitrate

use anyhow::Result;
use std::path::Path;
use tokio::fs;

use crate::config::Config;
use crate::media::MediaType;

/// Joiner used to flatten sub-folders into a single-level name
pub const NAME_JOINER: &str = "__";

/// Manages file classification and directory bookkeeping
pub struct FileManager;

impl FileManager {
    /// Lower-case extension of a path, if any
    pub fn extension(path: &Path) -> Option<String> {
        path.extension().map(|ext| ext.to_string_lossy().to_lowercase())
    }

    /// Classify a file against the configured allow-lists.
    ///
    /// Returns None for files that must not enter the worklist.
    pub fn classify(path: &Path, config: &Config) -> Option<MediaType> {
        let ext = Self::extension(path)?;
        let contains = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(&ext));

        if contains(&config.video_extensions) {
            Some(MediaType::Video)
        } else if config.include_sidecars && contains(&config.audio_extensions) {
            Some(MediaType::Audio)
        } else if config.include_sidecars && contains(&config.subtitle_extensions) {
            Some(MediaType::Subtitle)
        } else {
            None
        }
    }

    /// Strip `root` from `path` and flatten the remaining separators.
    ///
    /// `root/a/b/clip.mp4` becomes `a__b__clip.mp4`, so files from different
    /// sub-folders never collide in a shared output folder.
    pub fn display_name(root: &Path, path: &Path) -> String {
        let relative = path.strip_prefix(root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(NAME_JOINER)
    }

    /// Number of entries directly inside `dir` (0 when it does not exist)
    pub async fn count_entries(dir: &Path) -> Result<usize> {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(0);
        }
        let mut entries = fs::read_dir(dir).await?;
        let mut count = 0;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// File names inside `dir`, sorted
    pub async fn sorted_file_names(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove `dir` only if it is empty; any failure is ignored
    pub async fn remove_empty_dir(dir: &Path) -> bool {
        fs::remove_dir(dir).await.is_ok()
    }

    /// Remove a temporary directory tree if present
    pub async fn remove_tree(dir: &Path) -> Result<()> {
        if fs::try_exists(dir).await.unwrap_or(false) {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Bit rate in Kbits/s with `_` thousand separators, e.g. `20_000 Kbits/s`
    pub fn format_bit_rate(bit_rate: u64) -> String {
        let kbits = (bit_rate as f64 / 1_000.0).round() as u64;
        let digits = kbits.to_string();
        let mut grouped = String::new();
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('_');
            }
            grouped.push(ch);
        }
        format!("{} Kbits/s", grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let mut config = Config::default();
        assert_eq!(FileManager::classify(Path::new("a/B.MKV"), &config), Some(MediaType::Video));
        assert_eq!(FileManager::classify(Path::new("a/b.srt"), &config), None);
        assert_eq!(FileManager::classify(Path::new("a/noext"), &config), None);

        config.include_sidecars = true;
        assert_eq!(FileManager::classify(Path::new("a/b.srt"), &config), Some(MediaType::Subtitle));
        assert_eq!(FileManager::classify(Path::new("a/b.flac"), &config), Some(MediaType::Audio));
    }

    #[test]
    fn test_display_name_flattens_subfolders() {
        let root = PathBuf::from("/videos");
        assert_eq!(
            FileManager::display_name(&root, &root.join("s1").join("e1").join("clip.mp4")),
            "s1__e1__clip.mp4"
        );
        assert_eq!(FileManager::display_name(&root, &root.join("top.mkv")), "top.mkv");
    }

    #[tokio::test]
    async fn test_count_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("frames");
        assert_eq!(FileManager::count_entries(&dir).await.unwrap(), 0);

        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("frame00000002.jpg"), b"x").unwrap();
        std::fs::write(dir.join("frame00000001.jpg"), b"x").unwrap();
        assert_eq!(FileManager::count_entries(&dir).await.unwrap(), 2);
        assert_eq!(
            FileManager::sorted_file_names(&dir).await.unwrap(),
            vec!["frame00000001.jpg", "frame00000002.jpg"]
        );

        assert!(!FileManager::remove_empty_dir(&dir).await);
        FileManager::remove_tree(&dir).await.unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
    }

    #[test]
    fn test_format_bit_rate() {
        assert_eq!(FileManager::format_bit_rate(20_000_000), "20_000 Kbits/s");
        assert_eq!(FileManager::format_bit_rate(6_220_800), "6_221 Kbits/s");
        assert_eq!(FileManager::format_bit_rate(800_000), "800 Kbits/s");
    }
}
