//! Worker process spawn and stdout handshake.
//!
//! The host launches the worker with the listening port and bearer token
//! on the command line, then scans the worker's stdout for the PEM public
//! key block that completes the key exchange. After the handshake the
//! stdout stream keeps flowing into a reader task that feeds the
//! keepalive watchdog with every line.

use crate::error::spawn::SpawnError;
use crate::watchdog::WatchdogHandle;
use crate::{WORKER_BASE_URL, WORKER_BINARY, WORKER_HOSTNAME};

use common::ErrorLocation;
use common::session::{PEM_FOOTER, PEM_HEADER, Session, public_key_from_pem};

use std::env::current_exe;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::net::TcpListener as StdTcpListener;
use std::panic::Location;
use std::process::Stdio;
use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use log::{debug, info, trace, warn};
use reqwest::Client;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Child as TokioChild;
use tokio::process::Command as TokioCommand;
use tokio::spawn as TokioSpawn;
use tokio::time::sleep as TokioSleep;

const PORT_FLAG: &str = "--port";
const TOKEN_FLAG: &str = "--token";
const TOLERANCE_FLAG: &str = "--tolerance-ms";
const SPAWN_MAX_OUTPUT_LINES: usize = 100;
const HEALTH_CHECK_MAX_ELAPSED: Duration = Duration::from_secs(20);
const CHECK_HEALTH_DURATION: Duration = Duration::from_secs(3);
const HEALTH_CHECK_ENDPOINT: &str = "/health";

/// Accumulates stdout lines into the first complete PEM public key block.
///
/// The worker interleaves log output with the PEM block, and the base64
/// body may wrap over multiple lines; everything outside the markers is
/// ignored.
#[derive(Default)]
pub struct PemCollector {
    lines: Vec<String>,
    capturing: bool,
}

impl PemCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns the assembled PEM once the footer arrives.
    pub fn push(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim();

        if !self.capturing {
            if trimmed == PEM_HEADER {
                self.capturing = true;
                self.lines.push(trimmed.to_string());
            }
            return None;
        }

        self.lines.push(trimmed.to_string());
        if trimmed == PEM_FOOTER {
            self.capturing = false;
            Some(self.lines.join("\n"))
        } else {
            None
        }
    }
}

/// A spawned, handshaken, healthy worker.
pub struct WorkerProcess {
    child: TokioChild,
    pub port: u16,
    pub base_url: String,
}

impl WorkerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the worker. The stdout reader task ends on its own at EOF.
    pub async fn stop(mut self) {
        debug!("Stopping worker (PID: {:?})", self.child.id());
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill worker: {e}");
        }
    }
}

/// Spawn the worker, complete the stdout key handshake, and wait for it
/// to become healthy.
///
/// On success the session has the worker's public key installed and the
/// worker's stdout is being drained into `keepalive`. Every failure path
/// kills the child before returning; retrying is the supervisor's job.
pub async fn spawn_and_handshake(
    session: &mut Session,
    binary_override: Option<&str>,
    port_override: Option<u16>,
    tolerance_ms: i64,
    keepalive: WatchdogHandle,
) -> Result<WorkerProcess, SpawnError> {
    let port = match port_override {
        Some(port) => port,
        None => free_loopback_port()?,
    };

    let binary = binary_override.unwrap_or(WORKER_BINARY);
    info!("Spawning {binary} on port {port}");

    let mut child = spawn_worker_process(binary, port, session.token(), tolerance_ms).await?;

    match capture_handshake(&mut child, keepalive).await {
        Ok(pem) => {
            let remote = public_key_from_pem(&pem)?;
            session.install_remote(&remote)?;
        }
        Err(e) => {
            warn!(
                "Handshake failed, killing spawned worker (PID: {:?})",
                child.id()
            );
            let _ = child.kill().await;
            return Err(e);
        }
    }

    let base_url = format!("{WORKER_BASE_URL}:{port}");

    if let Err(e) = wait_for_health(&base_url).await {
        warn!(
            "Health check failed, killing spawned worker (PID: {:?})",
            child.id()
        );
        let _ = child.kill().await;
        return Err(e);
    }

    info!("Worker ready at {base_url} (PID: {:?})", child.id());

    Ok(WorkerProcess {
        child,
        port,
        base_url,
    })
}

/// Ask the OS for a currently free loopback port.
///
/// The port is released before the worker binds it, so a collision is
/// possible in principle; the supervisor's respawn covers that case.
#[track_caller]
fn free_loopback_port() -> Result<u16, SpawnError> {
    let listener =
        StdTcpListener::bind((WORKER_HOSTNAME, 0)).map_err(|e| SpawnError::Spawn {
            message: format!("Failed to reserve a loopback port: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })?;

    let port = listener
        .local_addr()
        .map_err(|e| SpawnError::Spawn {
            message: format!("Failed to read reserved port: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })?
        .port();

    Ok(port)
}

fn build_spawn_command(binary: &str, port: u16, token: &str, tolerance_ms: i64) -> TokioCommand {
    let mut cmd = TokioCommand::new(binary);
    cmd.arg(PORT_FLAG)
        .arg(port.to_string())
        .arg(TOKEN_FLAG)
        .arg(token)
        .arg(TOLERANCE_FLAG)
        .arg(tolerance_ms.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn spawn_worker_process(
    binary: &str,
    port: u16,
    token: &str,
    tolerance_ms: i64,
) -> Result<TokioChild, SpawnError> {
    debug!("Attempting to spawn {binary} from PATH");

    match build_spawn_command(binary, port, token, tolerance_ms).spawn() {
        Ok(child) => {
            info!("Spawned {binary} from PATH (PID: {:?})", child.id());
            Ok(child)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("{binary} not in PATH, trying local binary");
            spawn_local_binary(binary, port, token, tolerance_ms)
        }
        Err(err) => Err(SpawnError::Spawn {
            message: format!("Failed to spawn {binary}: {err}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(err),
        }),
    }
}

fn spawn_local_binary(
    binary: &str,
    port: u16,
    token: &str,
    tolerance_ms: i64,
) -> Result<TokioChild, SpawnError> {
    let exe = current_exe().map_err(|e| SpawnError::Spawn {
        message: format!("Failed to get current executable path: {e}"),
        location: ErrorLocation::from(Location::caller()),
        source: Box::new(e),
    })?;

    let dir = exe.parent().ok_or_else(|| SpawnError::Spawn {
        message: format!("Executable has no parent directory: {}", exe.display()),
        location: ErrorLocation::from(Location::caller()),
        source: Box::new(IoError::new(ErrorKind::NotFound, "no parent dir")),
    })?;

    let local_path = dir.join(binary);
    debug!("Attempting to spawn from {}", local_path.display());

    build_spawn_command(local_path.to_string_lossy().as_ref(), port, token, tolerance_ms)
        .current_dir(dir)
        .spawn()
        .map_err(|e| SpawnError::Spawn {
            message: format!("Failed to spawn {binary} from {}: {e}", local_path.display()),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })
}

/// Scan the worker's stdout for the PEM block, then hand the stream to a
/// long-lived reader that feeds the keepalive watchdog.
async fn capture_handshake(
    child: &mut TokioChild,
    keepalive: WatchdogHandle,
) -> Result<String, SpawnError> {
    let stdout = child.stdout.take().ok_or_else(|| SpawnError::Parse {
        message: "Child process has no stdout".to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if let Some(stderr) = child.stderr.take() {
        TokioSpawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!("Worker stderr: {line}");
            }
        });
    }

    let mut lines = BufReader::new(stdout).lines();
    let mut collector = PemCollector::new();

    for _ in 0..SPAWN_MAX_OUTPUT_LINES {
        match lines.next_line().await {
            Ok(Some(line)) => {
                trace!("Worker output: {line}");
                keepalive.feed();

                if let Some(pem) = collector.push(&line) {
                    info!("Captured worker public key");

                    // From here on, stdout lines are keepalive pongs.
                    let keepalive = keepalive.clone();
                    TokioSpawn(async move {
                        while let Ok(Some(line)) = lines.next_line().await {
                            trace!("Worker output: {line}");
                            keepalive.feed();
                        }
                        debug!("Worker stdout closed");
                    });

                    return Ok(pem);
                }
            }
            Ok(None) => {
                debug!("Worker process ended before printing its public key");
                break;
            }
            Err(e) => {
                return Err(SpawnError::Parse {
                    message: format!("Failed to read worker output: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }
    }

    Err(SpawnError::Handshake {
        message: format!(
            "No PEM public key found in first {SPAWN_MAX_OUTPUT_LINES} lines of output"
        ),
        location: ErrorLocation::from(Location::caller()),
    })
}

/// Check if the worker is up and answering.
///
/// Performs a lightweight GET to `{base_url}/health` with a short timeout.
pub async fn check_health(base_url: &str) -> bool {
    let url = format!("{base_url}{HEALTH_CHECK_ENDPOINT}");
    let client = Client::new();

    match client.get(&url).timeout(CHECK_HEALTH_DURATION).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!("Health check succeeded for {base_url}");
            true
        }
        Ok(resp) => {
            debug!(
                "Health check failed for {base_url}: status={}",
                resp.status()
            );
            false
        }
        Err(e) => {
            debug!("Health check failed for {base_url}: {e}");
            false
        }
    }
}

async fn wait_for_health(base_url: &str) -> Result<(), SpawnError> {
    let mut backoff = ExponentialBackoff {
        max_elapsed_time: Some(HEALTH_CHECK_MAX_ELAPSED),
        ..Default::default()
    };

    debug!("Waiting for worker health at {base_url}");

    loop {
        if check_health(base_url).await {
            info!("Worker is healthy at {base_url}");
            return Ok(());
        }

        match backoff.next_backoff() {
            Some(duration) => {
                trace!("Worker not ready, retrying after {duration:?}");
                TokioSleep(duration).await;
            }
            None => {
                return Err(SpawnError::Timeout {
                    message: format!(
                        "Worker at {base_url} did not become healthy within {HEALTH_CHECK_MAX_ELAPSED:?}"
                    ),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }
    }
}
