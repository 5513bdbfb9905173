//! # Platform-specific utilities
//!
//! Questo modulo centralizza tutta la logica cross-platform per l'esecuzione
//! dei tool esterni.
//!
//! ## Responsabilità:
//! - Risoluzione dei nomi configurati dei tool in path eseguibili
//! - Wrapper di shell che scrive l'exit code reale nel file side-channel
//! - Comando per terminare un intero albero di processi

use std::fmt;
use std::path::Path;

use crate::config::ToolsConfig;
use crate::tool_resolver::ToolPathResolver;

/// External collaborators driven by the pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalTool {
    Ffmpeg,
    Ffprobe,
    Upscaler,
    Interpolator,
}

impl ExternalTool {
    pub const ALL: [ExternalTool; 4] = [
        Self::Ffmpeg,
        Self::Ffprobe,
        Self::Upscaler,
        Self::Interpolator,
    ];

    /// Display name used in availability reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "FFmpeg",
            Self::Ffprobe => "FFprobe",
            Self::Upscaler => "Real-ESRGAN",
            Self::Interpolator => "IFRNet",
        }
    }

    /// Arguments of a cheap invocation that proves the tool runs
    pub fn probe_args(&self) -> &'static [&'static str] {
        match self {
            Self::Ffmpeg | Self::Ffprobe => &["-version"],
            Self::Upscaler | Self::Interpolator => &["-h"],
        }
    }
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Platform-specific command manager with tool resolution
#[derive(Debug, Clone)]
pub struct PlatformCommands {
    tools: ToolsConfig,
    tool_resolver: ToolPathResolver,
}

impl PlatformCommands {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            tools: tools.clone(),
            tool_resolver: ToolPathResolver::new(tools.tools_dir.as_deref()),
        }
    }

    /// Configured (unresolved) name of a tool
    pub fn configured_name(&self, tool: ExternalTool) -> &str {
        match tool {
            ExternalTool::Ffmpeg => &self.tools.ffmpeg,
            ExternalTool::Ffprobe => &self.tools.ffprobe,
            ExternalTool::Upscaler => &self.tools.upscaler,
            ExternalTool::Interpolator => &self.tools.interpolator,
        }
    }

    /// Program to launch: resolved path when found, configured name otherwise
    /// (the launch then fails and is reported as a step failure).
    pub fn program(&self, tool: ExternalTool) -> String {
        let name = self.configured_name(tool);
        self.tool_resolver
            .resolve_tool(name)
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn resolver(&self) -> &ToolPathResolver {
        &self.tool_resolver
    }

    /// Resolve every tool once, for the command builder
    pub fn programs(&self) -> ToolPrograms {
        ToolPrograms {
            ffmpeg: self.program(ExternalTool::Ffmpeg),
            ffprobe: self.program(ExternalTool::Ffprobe),
            upscaler: self.program(ExternalTool::Upscaler),
            interpolator: self.program(ExternalTool::Interpolator),
        }
    }

    /// Wrap a shell command so the tool's own exit code lands in `exit_code_file`.
    ///
    /// Returns the shell program and its arguments.
    pub fn wrap_with_exit_code(command: &str, exit_code_file: &Path) -> (String, Vec<String>) {
        let file = exit_code_file.to_string_lossy();
        if cfg!(windows) {
            (
                "cmd".to_string(),
                vec![
                    "/V:ON".to_string(),
                    "/C".to_string(),
                    format!("{} & echo !errorLevel! > \"{}\"", command, file),
                ],
            )
        } else {
            (
                "sh".to_string(),
                vec![
                    "-c".to_string(),
                    format!("{}; echo $? > {}", command, quote_posix(&file)),
                ],
            )
        }
    }

    /// Command that kills the process tree rooted at `pid`.
    ///
    /// On unix children are spawned as group leaders, so the group id equals `pid`.
    pub fn kill_tree_command(pid: u32) -> (String, Vec<String>) {
        if cfg!(windows) {
            (
                "taskkill".to_string(),
                vec!["/F".to_string(), "/T".to_string(), "/PID".to_string(), pid.to_string()],
            )
        } else {
            (
                "kill".to_string(),
                vec!["-s".to_string(), "KILL".to_string(), "--".to_string(), format!("-{}", pid)],
            )
        }
    }

    /// Get system information for debugging
    pub fn system_info() -> SystemInfo {
        SystemInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
        }
    }
}

/// Program names or paths used in built command lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPrograms {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub upscaler: String,
    pub interpolator: String,
}

impl ToolPrograms {
    pub fn get(&self, tool: ExternalTool) -> &str {
        match tool {
            ExternalTool::Ffmpeg => &self.ffmpeg,
            ExternalTool::Ffprobe => &self.ffprobe,
            ExternalTool::Upscaler => &self.upscaler,
            ExternalTool::Interpolator => &self.interpolator,
        }
    }
}

/// Configured names, without any lookup
impl From<&ToolsConfig> for ToolPrograms {
    fn from(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            ffprobe: tools.ffprobe.clone(),
            upscaler: tools.upscaler.clone(),
            interpolator: tools.interpolator.clone(),
        }
    }
}

/// Single-quote a string for a POSIX shell
pub fn quote_posix(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Double-quote a string for cmd.exe
pub fn quote_windows(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// System information structure
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_unresolved_tool_keeps_configured_name() {
        let tools = ToolsConfig {
            upscaler: "definitely-not-a-real-upscaler".to_string(),
            ..Default::default()
        };
        let platform = PlatformCommands::new(&tools);
        assert_eq!(
            platform.program(ExternalTool::Upscaler),
            "definitely-not-a-real-upscaler"
        );
        assert_eq!(platform.configured_name(ExternalTool::Ffprobe), "ffprobe");
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_wrapper() {
        let (shell, args) =
            PlatformCommands::wrap_with_exit_code("ffmpeg -version", &PathBuf::from("/v/exitCode.txt"));
        assert_eq!(shell, "sh");
        assert_eq!(args, vec!["-c", "ffmpeg -version; echo $? > '/v/exitCode.txt'"]);

        let (kill, args) = PlatformCommands::kill_tree_command(1234);
        assert_eq!(kill, "kill");
        assert_eq!(args.last().map(String::as_str), Some("-1234"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_posix("it's.mp4"), r"'it'\''s.mp4'");
        assert_eq!(quote_windows("a b.mp4"), "\"a b.mp4\"");
    }

    #[test]
    fn test_system_info() {
        let info = PlatformCommands::system_info();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
        assert!(!info.family.is_empty());
    }
}
