//! # Process Launcher
//!
//! Spawns and supervises plugin subprocesses. A plugin is launched with the
//! host's environment plus `FINFOCUS_HOME` and `FINFOCUS_LOG_LEVEL`
//! injected, its stdout piped. The launcher reads exactly one
//! newline-terminated handshake line (see [`crate::proto::Handshake`])
//! within the startup timeout; everything after that line is drained to the
//! host's logs at debug level.
//!
//! Failure modes map onto distinct error variants: a missing binary, a
//! spawn failure, a handshake that never arrives, and a handshake that does
//! not parse. On every failure path the child is reaped (killed and
//! `wait`ed) so no zombie survives a failed launch.
//!
//! Shutdown runs a ladder: the caller first sends the graceful-stop RPC,
//! then [`LaunchedPlugin::shutdown`] waits up to the grace period for the
//! process to exit on its own, kills it otherwise, sleeps a short drain
//! delay, and always `wait`s.

use crate::error::PluginError;
use crate::proto::Handshake;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default time a plugin gets to print its handshake line.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a plugin gets to exit after the graceful-stop RPC.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default drain delay between kill and the final `wait`, so post-kill
/// stdio flushes before the pipes are torn down.
pub const DEFAULT_KILL_WAIT: Duration = Duration::from_millis(500);

/// Parameters for launching one plugin subprocess.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Path to the plugin binary
    pub binary: PathBuf,
    /// Extra command-line arguments
    pub args: Vec<String>,
    /// Home directory injected as `FINFOCUS_HOME`
    pub home_dir: PathBuf,
    /// Log level injected as `FINFOCUS_LOG_LEVEL`
    pub log_level: String,
    /// Deadline for the handshake line
    pub startup_timeout: Duration,
    /// Grace period between the stop RPC and a forced kill
    pub shutdown_grace: Duration,
    /// Drain delay after a forced kill
    pub kill_wait: Duration,
}

impl LaunchOptions {
    /// Options with the default timeouts.
    pub fn new(binary: impl Into<PathBuf>, home_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            home_dir: home_dir.into(),
            log_level: "info".to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            kill_wait: DEFAULT_KILL_WAIT,
        }
    }

    /// Override the log level passed to the plugin.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Override the handshake deadline.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Override the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// A running plugin subprocess that completed its handshake.
#[derive(Debug)]
pub struct LaunchedPlugin {
    child: Child,
    handshake: Handshake,
}

impl LaunchedPlugin {
    /// The parsed handshake the plugin printed.
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// OS process id, when the process is still attached.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the subprocess.
    ///
    /// Waits up to `grace` for a voluntary exit (the caller is expected to
    /// have sent the graceful-stop RPC already), then kills. The final
    /// `wait` always runs so the child never leaks as a zombie.
    pub async fn shutdown(&mut self, grace: Duration, kill_wait: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "plugin exited within grace period");
                return;
            }
            Ok(Err(err)) => {
                warn!(error = %err, "failed waiting on plugin process");
            }
            Err(_) => {
                debug!(grace = ?grace, "plugin still running after grace period, killing");
            }
        }
        if let Err(err) = self.child.start_kill() {
            warn!(error = %err, "failed to kill plugin process");
        }
        tokio::time::sleep(kill_wait).await;
        let _ = self.child.wait().await;
    }
}

/// Spawn a plugin and read its handshake.
pub async fn launch(options: &LaunchOptions) -> Result<LaunchedPlugin, PluginError> {
    if !options.binary.exists() {
        return Err(PluginError::BinaryMissing { path: options.binary.clone() });
    }

    let mut command = Command::new(&options.binary);
    command
        .args(&options.args)
        .env(crate::home::HOME_ENV, &options.home_dir)
        .env("FINFOCUS_LOG_LEVEL", &options.log_level)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => PluginError::BinaryMissing { path: options.binary.clone() },
        _ => PluginError::SpawnFailed { source },
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PluginError::transport("plugin stdout was not captured"))?;
    let mut lines = BufReader::new(stdout).lines();

    let line = match tokio::time::timeout(options.startup_timeout, lines.next_line()).await {
        Err(_) => {
            reap(&mut child).await;
            return Err(PluginError::HandshakeTimeout { timeout: options.startup_timeout });
        }
        Ok(Err(err)) => {
            reap(&mut child).await;
            return Err(PluginError::transport(format!("reading handshake: {err}")));
        }
        Ok(Ok(None)) => {
            reap(&mut child).await;
            return Err(PluginError::HandshakeMalformed { line: String::new() });
        }
        Ok(Ok(Some(line))) => line,
    };

    let handshake = match Handshake::parse(&line) {
        Ok(handshake) => handshake,
        Err(err) => {
            reap(&mut child).await;
            return Err(err);
        }
    };

    debug!(
        binary = %options.binary.display(),
        address = %handshake.address,
        server_version = %handshake.server_version,
        "plugin handshake complete"
    );

    // Anything the plugin prints after the handshake belongs in our logs,
    // not on the host's stdout.
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "finfocus::plugin_stdout", "{line}");
        }
    });

    Ok(LaunchedPlugin { child, handshake })
}

async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}
