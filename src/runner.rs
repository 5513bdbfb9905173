//! # Process Runner Module
//!
//! Esecuzione dei tool esterni come processi figli.
//!
//! ## Responsabilità:
//! - `run_foreground`: un solo processo alla volta, lanciato tramite wrapper di shell
//!   che scrive l'exit code reale nel file side-channel
//! - `run_async_batch`: query brevi lanciate tutte insieme e attese insieme
//!   (probe, verifica tool, still delle preview), ordine di input preservato
//! - `kill`: termina l'intero albero di processi (shell + tool) del foreground
//!   e dei figli batch; no-op se nulla è in esecuzione
//! - `request_stop`: kill + stop pendente, nessun nuovo foreground parte
//!   finché `reset_kill` non lo azzera
//!
//! ## Classificazione dell'esito:
//! - file side-channel assente: `Stopped` se è stato richiesto un kill, altrimenti `Inconclusive`
//! - exit code 0 o -1: `Completed`
//! - qualsiasi altro exit code: `Failed`

use anyhow::Result;
use futures::future::join_all;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command_builder::CommandLine;
use crate::platform::PlatformCommands;
use crate::utils::format_elapsed;

/// Lines of tool stderr kept for diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// Classified result of a foreground run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed { code: i32 },
    /// Killed on request; no exit code was written
    Stopped,
    /// No exit code was written, but nobody asked for a kill
    Inconclusive,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Exit codes counted as success; -1 is what some tools return for `-h`
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 | -1 => Self::Completed,
            code => Self::Failed { code },
        }
    }
}

/// Raw result of one batch child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    /// None when the child could not be launched or was killed
    pub return_code: Option<i32>,
    pub stdout: Vec<u8>,
}

impl BatchOutput {
    /// Same success rule as the foreground side-channel
    pub fn is_success(&self) -> bool {
        matches!(self.return_code, Some(0) | Some(-1))
    }
}

#[derive(Debug, Default)]
struct LiveProcesses {
    foreground: bool,
    batch: usize,
    /// Set by `request_stop`, survives until `reset_kill`
    stop_requested: bool,
}

/// Launches external tools and owns the kill switch
#[derive(Debug)]
pub struct ProcessRunner {
    workdir: PathBuf,
    exit_code_file: PathBuf,
    killed: AtomicBool,
    kill_tx: watch::Sender<u64>,
    live: Mutex<LiveProcesses>,
}

/// Clears the foreground slot even if the run future is dropped mid-flight
struct ForegroundSlot<'a> {
    runner: &'a ProcessRunner,
}

impl Drop for ForegroundSlot<'_> {
    fn drop(&mut self) {
        self.runner.live().foreground = false;
    }
}

/// Releases batch slots even if the batch future is dropped mid-flight
struct BatchSlots<'a> {
    runner: &'a ProcessRunner,
    count: usize,
}

impl Drop for BatchSlots<'_> {
    fn drop(&mut self) {
        let mut live = self.runner.live();
        live.batch = live.batch.saturating_sub(self.count);
    }
}

impl ProcessRunner {
    /// `workdir` is the scan root; the side-channel file lives there
    pub fn new(workdir: impl Into<PathBuf>, exit_code_file_name: &str) -> Self {
        let workdir = workdir.into();
        let exit_code_file = workdir.join(exit_code_file_name);
        let (kill_tx, _) = watch::channel(0);
        Self {
            workdir,
            exit_code_file,
            killed: AtomicBool::new(false),
            kill_tx,
            live: Mutex::new(LiveProcesses::default()),
        }
    }

    pub fn exit_code_file(&self) -> &Path {
        &self.exit_code_file
    }

    fn live(&self) -> MutexGuard<'_, LiveProcesses> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether any foreground or batch child is in flight
    pub fn is_running(&self) -> bool {
        let live = self.live();
        live.foreground || live.batch > 0
    }

    /// Whether the last kill request reached a live process
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Whether a stop is pending for the current run
    pub fn stop_requested(&self) -> bool {
        self.live().stop_requested
    }

    /// Forget a kill or stop request left by a previous run
    pub fn reset_kill(&self) {
        let mut live = self.live();
        live.stop_requested = false;
        self.killed.store(false, Ordering::SeqCst);
    }

    /// Kill every live child tree. No-op when nothing is running.
    pub fn kill(&self) {
        let live = self.live();
        self.kill_live(&live);
    }

    /// Kill what is running and refuse every later foreground launch.
    ///
    /// Recorded under the same lock `run_foreground` claims its slot with,
    /// so a stop arriving just before a launch is never lost.
    pub fn request_stop(&self) {
        let mut live = self.live();
        live.stop_requested = true;
        self.kill_live(&live);
    }

    fn kill_live(&self, live: &LiveProcesses) {
        if !live.foreground && live.batch == 0 {
            debug!("Kill requested but no process is running");
            return;
        }
        self.killed.store(true, Ordering::SeqCst);
        self.kill_tx.send_modify(|generation| *generation += 1);
        info!("Kill requested, stopping running processes");
    }

    /// Run one command through the exit-code shell wrapper and classify it.
    ///
    /// Clears any previous kill flag first. Returns `Stopped` without
    /// launching anything while a stop is pending. Fails only when the shell
    /// itself cannot be launched or another foreground run is live.
    pub async fn run_foreground(&self, command: &CommandLine, step: &str) -> Result<ProcessOutcome> {
        let mut kill_rx = self.kill_tx.subscribe();
        let _slot = {
            let mut live = self.live();
            if live.foreground {
                return Err(anyhow::anyhow!(
                    "A foreground process is already running, cannot start {}",
                    step
                ));
            }
            if live.stop_requested {
                info!("Stop pending, {} not started", step);
                return Ok(ProcessOutcome::Stopped);
            }
            live.foreground = true;
            self.killed.store(false, Ordering::SeqCst);
            ForegroundSlot { runner: self }
        };

        remove_if_present(&self.exit_code_file).await?;

        let (shell, shell_args) =
            PlatformCommands::wrap_with_exit_code(&command.to_shell_string(), &self.exit_code_file);

        let mut cmd = Command::new(&shell);
        cmd.args(&shell_args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        info!("Running process : {}", step);
        debug!("Command: {}", command);
        let start_time = Instant::now();

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to launch {} for {}: {}", shell, step, e))?;
        let pid = child.id();

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("  | {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            })
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx.changed() => {
                debug!("Killing process tree of {}", step);
                if let Some(pid) = pid {
                    kill_tree(pid).await;
                }
                let _ = child.start_kill();
                child.wait().await
            }
        };
        if let Err(e) = status {
            warn!("Failed to wait for {}: {}", step, e);
        }

        let tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => VecDeque::new(),
        };

        info!("Took : {}", format_elapsed(start_time.elapsed()));

        let outcome = self.check_exit_code().await?;
        match outcome {
            ProcessOutcome::Completed => info!("Process end correctly"),
            ProcessOutcome::Failed { code } => {
                warn!("Process end with return code {}", code);
                for line in &tail {
                    debug!("  stderr: {}", line);
                }
            }
            ProcessOutcome::Stopped => warn!("Process stopped"),
            ProcessOutcome::Inconclusive => warn!("Process ended without writing an exit code"),
        }
        Ok(outcome)
    }

    /// Read, delete and classify the side-channel file
    async fn check_exit_code(&self) -> Result<ProcessOutcome> {
        let content = match tokio::fs::read_to_string(&self.exit_code_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(if self.was_killed() {
                    ProcessOutcome::Stopped
                } else {
                    ProcessOutcome::Inconclusive
                });
            }
            Err(e) => return Err(e.into()),
        };
        remove_if_present(&self.exit_code_file).await?;

        Ok(match content.trim().parse::<i64>() {
            // cmd.exe may print -1 as 4294967295
            Ok(code) => ProcessOutcome::from_exit_code(code as i32),
            Err(_) => {
                warn!("Unreadable exit code {:?}", content.trim());
                ProcessOutcome::Inconclusive
            }
        })
    }

    /// Launch all commands at once, wait for all, keep input order
    pub async fn run_async_batch(&self, commands: &[CommandLine]) -> Vec<BatchOutput> {
        let kill_rx = self.kill_tx.subscribe();
        let _slots = {
            let mut live = self.live();
            live.batch += commands.len();
            BatchSlots {
                runner: self,
                count: commands.len(),
            }
        };

        debug!("Launching {} batch process(es)", commands.len());
        join_all(
            commands
                .iter()
                .map(|command| run_batch_child(command, &self.workdir, kill_rx.clone())),
        )
        .await
    }
}

async fn run_batch_child(
    command: &CommandLine,
    workdir: &Path,
    mut kill_rx: watch::Receiver<u64>,
) -> BatchOutput {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!("Failed to launch {}: {}", command.program, e);
            return BatchOutput {
                return_code: None,
                stdout: Vec::new(),
            };
        }
    };
    let pid = child.id();

    tokio::select! {
        output = child.wait_with_output() => match output {
            Ok(output) => BatchOutput {
                return_code: output.status.code(),
                stdout: output.stdout,
            },
            Err(e) => {
                debug!("Failed to collect {}: {}", command.program, e);
                BatchOutput { return_code: None, stdout: Vec::new() }
            }
        },
        _ = kill_rx.changed() => {
            if let Some(pid) = pid {
                kill_tree(pid).await;
            }
            BatchOutput { return_code: None, stdout: Vec::new() }
        }
    }
}

/// Kill the whole tree rooted at `pid`
async fn kill_tree(pid: u32) {
    let (program, args) = PlatformCommands::kill_tree_command(pid);
    match Command::new(&program).args(&args).output().await {
        Ok(output) if output.status.success() => debug!("Killed process tree {}", pid),
        Ok(output) => debug!(
            "{} {} exited with {:?}",
            program,
            pid,
            output.status.code()
        ),
        Err(e) => warn!("Failed to run {}: {}", program, e),
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
