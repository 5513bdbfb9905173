//! # Tool Path Resolver
//!
//! Questo modulo trova i tool esterni (ffmpeg, ffprobe, Real-ESRGAN, IFRNet)
//! nei diversi ambienti:
//! - Build bundled in una directory `tools/` accanto all'eseguibile
//! - Directory indicata in configurazione o via `TOOLS_DIR`
//! - Tool installati nel `PATH` di sistema

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sub-folders of a bundled tools directory, one per tool distribution
pub const BUNDLED_SUBDIRS: &[&str] = &["ffmpeg-full_build/bin", "Real-ESRGAN", "Ifrnet"];

/// Tool path resolver for bundled and system-installed tools
#[derive(Debug, Clone)]
pub struct ToolPathResolver {
    /// Base directory where tool builds are bundled
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    /// Create a resolver, preferring `configured` over auto-detection
    pub fn new(configured: Option<&Path>) -> Self {
        let tools_dir = match configured {
            Some(dir) if dir.is_dir() => Some(dir.to_path_buf()),
            Some(dir) => {
                warn!("Configured tools directory {:?} does not exist", dir);
                Self::detect_bundled_tools_dir()
            }
            None => Self::detect_bundled_tools_dir(),
        };
        Self { tools_dir }
    }

    /// Resolver that only looks at `tools_dir` and the system PATH
    pub fn with_tools_dir(tools_dir: Option<PathBuf>) -> Self {
        Self { tools_dir }
    }

    pub fn tools_dir(&self) -> Option<&Path> {
        self.tools_dir.as_deref()
    }

    /// Detect the bundled tools directory
    fn detect_bundled_tools_dir() -> Option<PathBuf> {
        // Strategy 1: TOOLS_DIR environment variable (direct override)
        if let Ok(tools_dir) = env::var("TOOLS_DIR") {
            let tools_path = PathBuf::from(tools_dir);
            debug!("Checking TOOLS_DIR environment variable: {:?}", tools_path);
            if tools_path.is_dir() {
                return Some(tools_path);
            }
        }

        // Strategy 2: ./tools in the working directory
        if let Ok(current_dir) = env::current_dir() {
            let tools_path = current_dir.join("tools");
            debug!("Checking working directory tools path: {:?}", tools_path);
            if tools_path.is_dir() {
                return Some(tools_path);
            }
        }

        // Strategy 3: tools/ next to the executable
        if let Ok(exe_path) = env::current_exe() {
            if let Some(app_dir) = exe_path.parent() {
                let tools_path = app_dir.join("tools");
                debug!("Checking executable tools path: {:?}", tools_path);
                if tools_path.is_dir() {
                    return Some(tools_path);
                }
            }
        }

        debug!("No bundled tools directory found, using system PATH only");
        None
    }

    /// Resolve the path to a specific tool.
    ///
    /// `tool_name` may already be a path, in which case it is returned as is
    /// when it exists.
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        let as_path = Path::new(tool_name);
        if as_path.components().count() > 1 {
            return as_path.is_file().then(|| as_path.to_path_buf());
        }

        if let Some(bundled) = self.find_in_bundled_dirs(tool_name) {
            debug!("Using bundled tool: {} -> {:?}", tool_name, bundled);
            return Some(bundled);
        }

        if let Some(system_path) = Self::find_in_system_path(tool_name) {
            debug!("Using system tool: {} -> {:?}", tool_name, system_path);
            return Some(system_path);
        }

        debug!("Tool not found: {}", tool_name);
        None
    }

    /// Bundled layout: `<tools_dir>/<subdir>/<tool>[.exe]`, or directly in `<tools_dir>`
    fn find_in_bundled_dirs(&self, tool_name: &str) -> Option<PathBuf> {
        let tools_dir = self.tools_dir.as_ref()?;
        let file_name = executable_name(tool_name);

        BUNDLED_SUBDIRS
            .iter()
            .map(|subdir| tools_dir.join(subdir).join(&file_name))
            .chain(std::iter::once(tools_dir.join(&file_name)))
            .find(|path| path.is_file())
    }

    /// Find tool in system PATH
    fn find_in_system_path(tool_name: &str) -> Option<PathBuf> {
        let file_name = executable_name(tool_name);
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
    }

    /// Get installation instructions for a tool on Linux
    fn get_linux_install_instructions(tool_name: &str) -> String {
        match tool_name {
            "ffmpeg" | "ffprobe" => "sudo apt-get install ffmpeg".to_string(),
            "realesrgan-ncnn-vulkan" => {
                "download from: https://github.com/xinntao/Real-ESRGAN/releases".to_string()
            }
            "ifrnet-ncnn-vulkan" => {
                "download from: https://github.com/nihui/ifrnet-ncnn-vulkan/releases".to_string()
            }
            _ => format!("sudo apt-get install {}", tool_name),
        }
    }

    /// Check if a tool is available and provide installation instructions if not
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        if let Some(path) = self.resolve_tool(tool_name) {
            return Ok(path);
        }
        if cfg!(target_os = "linux") {
            Err(format!(
                "Tool '{}' not found in system PATH.\nTo install on Linux:\n  {}",
                tool_name,
                Self::get_linux_install_instructions(tool_name)
            ))
        } else {
            Err(format!(
                "Tool '{}' not found, please check if it is in environment \"PATH\" or in the bundled tools directory",
                tool_name
            ))
        }
    }
}

/// Append `.exe` on Windows unless already present
pub fn executable_name(tool_name: &str) -> String {
    if cfg!(windows) && !tool_name.to_ascii_lowercase().ends_with(".exe") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_subdir_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let esrgan_dir = temp_dir.path().join("Real-ESRGAN");
        std::fs::create_dir_all(&esrgan_dir).unwrap();
        let tool = esrgan_dir.join(executable_name("realesrgan-ncnn-vulkan"));
        std::fs::write(&tool, b"").unwrap();

        let resolver = ToolPathResolver::with_tools_dir(Some(temp_dir.path().to_path_buf()));
        assert_eq!(resolver.resolve_tool("realesrgan-ncnn-vulkan"), Some(tool));
        assert_eq!(resolver.resolve_tool("definitely-not-a-real-tool-42"), None);
    }

    #[test]
    fn test_explicit_path() {
        let temp_dir = TempDir::new().unwrap();
        let tool = temp_dir.path().join("my-ffmpeg");
        std::fs::write(&tool, b"").unwrap();

        let resolver = ToolPathResolver::with_tools_dir(None);
        let tool_str = tool.to_string_lossy().into_owned();
        assert_eq!(resolver.resolve_tool(&tool_str), Some(tool.clone()));

        let missing = temp_dir.path().join("absent").to_string_lossy().into_owned();
        assert_eq!(resolver.resolve_tool(&missing), None);
    }

    #[test]
    fn test_missing_tool_message() {
        let resolver = ToolPathResolver::with_tools_dir(None);
        let err = resolver
            .check_tool_with_instructions("definitely-not-a-real-tool-42")
            .unwrap_err();
        assert!(err.contains("definitely-not-a-real-tool-42"));
    }
}
