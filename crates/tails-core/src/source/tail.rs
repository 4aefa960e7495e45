//! Line source backed by an external `tail` process.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{LineSource, SourceError, decode_line};

/// Configuration for the `tail` process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    /// Path to the `tail` binary.
    pub program: PathBuf,
    /// Lines of history printed on the first start. Restarts use 0.
    pub initial_lines: usize,
    /// Follow the file name (`-F`) rather than the descriptor (`-f`), so
    /// rotated files are picked up.
    pub follow_name: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tail"),
            initial_lines: 10,
            follow_name: true,
        }
    }
}

/// Runs `tail -n <N> -F <path>` and reads its stdout line by line.
pub struct TailProcess {
    path: PathBuf,
    config: TailConfig,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    buf: Vec<u8>,
}

impl TailProcess {
    pub fn new(path: impl Into<PathBuf>, config: TailConfig) -> Self {
        Self {
            path: path.into(),
            config,
            child: None,
            stdout: None,
            buf: Vec::new(),
        }
    }

    fn args(&self, first_run: bool) -> Vec<OsString> {
        let lines = if first_run { self.config.initial_lines } else { 0 };
        let follow = if self.config.follow_name { "-F" } else { "-f" };
        vec![
            "-n".into(),
            lines.to_string().into(),
            follow.into(),
            "--".into(),
            self.path.clone().into_os_string(),
        ]
    }

    fn program(&self) -> String {
        self.config.program.display().to_string()
    }

    async fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "tail process already gone");
            }
            let _ = child.wait().await;
        }
    }
}

impl LineSource for TailProcess {
    async fn start(&mut self, first_run: bool) -> Result<(), SourceError> {
        self.stop().await;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.args(first_run))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            program = %self.program(),
            path = %self.path.display(),
            first_run,
            "Spawning tail process"
        );
        let mut child = cmd.spawn().map_err(|e| SourceError::Spawn {
            program: self.program(),
            source: e,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| SourceError::Spawn {
            program: self.program(),
            source: io::Error::other("failed to capture stdout"),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let path = self.path.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(path = %path.display(), "tail stderr: {}", line);
                }
                debug!(path = %path.display(), "tail stderr reader finished");
            });
        }

        debug!(pid = ?child.id(), "tail process started");
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        self.buf.clear();
        let read = stdout
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|e| SourceError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        if read > 0 {
            return Ok(Some(decode_line(&self.buf)));
        }

        // stdout closed: the process is exiting.
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status = child.wait().await.map_err(|e| SourceError::Io {
            path: self.path.clone(),
            source: e,
        })?;

        if status.success() {
            info!(path = %self.path.display(), "tail process finished");
            Ok(None)
        } else {
            Err(SourceError::Exited {
                status: status.to_string(),
            })
        }
    }

    fn describe(&self) -> String {
        format!("{} -F {}", self.program(), self.path.display())
    }
}
