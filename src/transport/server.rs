//! Target sessions in a child process.
//!
//! Spawns `blocksync target ...` either over SSH or as a local subprocess
//! and hands its stdin/stdout to a [`Transport`]. The child's stderr is
//! inherited, so remote diagnostics reach the user without touching the
//! protocol stream.

use crate::error::{Error, Result};
use crate::transport::{Connector, TargetRequest, Transport};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Default command that runs blocksync on the target host
pub const DEFAULT_REMOTE_COMMAND: &str = "blocksync";

/// How to reach the target host over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub hostname: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Extra `-o` options
    pub options: Vec<String>,
    /// Program started on the remote host
    pub remote_command: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            user: None,
            port: 22,
            identity_file: None,
            options: Vec::new(),
            remote_command: DEFAULT_REMOTE_COMMAND.to_string(),
        }
    }
}

impl SshConfig {
    /// Split a `user@host` argument. A bare host leaves the user unset.
    pub fn parse_destination(dest: &str) -> (Option<String>, String) {
        match dest.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host.to_string()),
            _ => (None, dest.trim_start_matches('@').to_string()),
        }
    }

    /// The ssh invocation for `request`, program name excluded.
    pub fn ssh_args(&self, request: &TargetRequest) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().into_owned());
        }
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args.push(self.hostname.clone());

        // ssh hands the remote command to a shell, so quote every word.
        let mut remote = vec![self.remote_command.clone()];
        remote.extend(target_args(request));
        args.push(
            remote
                .iter()
                .map(|w| shell_quote(w))
                .collect::<Vec<_>>()
                .join(" "),
        );
        args
    }
}

/// Arguments for `blocksync target` that reproduce `request`.
///
/// The device comes last, after `--`, so a path starting with `-` is not
/// taken for a flag.
pub fn target_args(request: &TargetRequest) -> Vec<String> {
    vec![
        "target".to_string(),
        "--block-size".to_string(),
        request.block_size.to_string(),
        "--digest".to_string(),
        request.digest.name().to_string(),
        "--length".to_string(),
        request.length.to_string(),
        "--".to_string(),
        request.device.clone(),
    ]
}

/// Quote a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn spawn(mut cmd: Command, what: &str) -> Result<Transport> {
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Connection(format!("failed to spawn {}: {}", what, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Connection("failed to open stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Connection("failed to open stdout".to_string()))?;

    Ok(Transport::new(stdout, stdin).with_child(child))
}

/// Runs the target on a remote host over SSH.
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn describe(&self) -> String {
        match &self.config.user {
            Some(user) => format!("ssh {}@{}", user, self.config.hostname),
            None => format!("ssh {}", self.config.hostname),
        }
    }

    async fn connect(&self, request: &TargetRequest) -> Result<Transport> {
        let args = self.config.ssh_args(request);
        tracing::debug!("Running: ssh {}", args.join(" "));

        let mut cmd = Command::new("ssh");
        cmd.args(&args);
        spawn(cmd, "SSH process")
    }
}

/// Runs the target as a local subprocess (testing, or two devices on one host).
#[derive(Debug, Clone)]
pub struct LocalConnector {
    pub program: PathBuf,
}

impl LocalConnector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the running executable as the target program.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn describe(&self) -> String {
        format!("local {}", self.program.display())
    }

    async fn connect(&self, request: &TargetRequest) -> Result<Transport> {
        let args = target_args(request);
        tracing::debug!("Running: {} {}", self.program.display(), args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        spawn(cmd, "blocksync process")
    }
}
