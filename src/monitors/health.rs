//! Health probes for monitored services
//!
//! [`HealthChecker::check`] runs one probe and always produces a
//! [`CheckOutcome`]; transport and process failures become `down` results
//! with an error message instead of errors.

use std::io::Write;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Context;
use regex::Regex;
use tempfile::TempPath;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use crate::models::{CheckKind, CheckOutcome, CheckStatus, CustomCheck, MonitoredService};

/// Round-trip time as printed by `ping` on Linux, macOS and Windows
static RTT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[<=]\s*(\d+(?:\.\d+)?)").expect("RTT pattern is valid"));

/// Executes health probes; one instance is shared by every service check
#[derive(Debug, Clone)]
pub struct HealthChecker {
    /// HTTP client (reused across probes)
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("monitorix/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build health check HTTP client")?;

        Ok(Self { client })
    }

    /// Probe a service with its configured check and deadline
    #[instrument(skip(self, service), fields(service = %service.name, check = service.check.type_name()))]
    pub async fn check_service(&self, service: &MonitoredService) -> CheckOutcome {
        self.check(&service.check, Duration::from_secs(service.timeout.max(1)))
            .await
    }

    pub async fn check(&self, kind: &CheckKind, timeout: Duration) -> CheckOutcome {
        let outcome = match kind {
            CheckKind::Http {
                url,
                expected_status,
            } => self.check_http(url, *expected_status, timeout).await,
            CheckKind::Tcp { host, port } => check_port(host, *port, timeout).await,
            CheckKind::Ping { host } => check_ping(host, timeout).await,
            CheckKind::Custom { run } => check_custom(run, timeout).await,
        };

        debug!(
            status = %outcome.status,
            response_time_ms = ?outcome.response_time_ms,
            "probe finished"
        );
        outcome
    }

    async fn check_http(&self, url: &str, expected_status: u16, timeout: Duration) -> CheckOutcome {
        trace!("GET {url}");
        let start = Instant::now();

        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let response_time_ms = Some(elapsed_ms(start));

                if status_code == expected_status {
                    CheckOutcome {
                        status: CheckStatus::Up,
                        response_time_ms,
                        status_code: Some(status_code),
                        error_message: None,
                    }
                } else {
                    CheckOutcome {
                        status: CheckStatus::Warning,
                        response_time_ms,
                        status_code: Some(status_code),
                        error_message: Some(format!(
                            "Expected status {expected_status}, got {status_code}"
                        )),
                    }
                }
            }
            Err(e) if e.is_timeout() => CheckOutcome::down(format!(
                "Request timeout after {} seconds",
                timeout.as_secs()
            )),
            Err(e) => CheckOutcome {
                response_time_ms: Some(elapsed_ms(start)),
                ..CheckOutcome::down(error_chain(&e))
            },
        }
    }
}

async fn check_port(host: &str, port: u16, timeout: Duration) -> CheckOutcome {
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => CheckOutcome::up(Some(elapsed_ms(start))),
        Ok(Err(e)) => CheckOutcome::down(format!("Port {port} is not open: {e}")),
        Err(_) => CheckOutcome::down(format!(
            "Port {port} is not open (no answer within {} seconds)",
            timeout.as_secs()
        )),
    }
}

async fn check_ping(host: &str, timeout: Duration) -> CheckOutcome {
    let secs = timeout.as_secs().max(1);

    let mut command = Command::new("ping");
    if cfg!(windows) {
        command
            .arg("-n")
            .arg("1")
            .arg("-w")
            .arg((secs * 1000).to_string());
    } else {
        command.arg("-c").arg("1").arg("-W").arg(secs.to_string());
    }
    command.arg(host).stdin(Stdio::null()).kill_on_drop(true);

    let deadline = Duration::from_secs(secs + 1);

    match tokio::time::timeout(deadline, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            CheckOutcome::up(parse_rtt(&stdout))
        }
        Ok(Ok(_)) => CheckOutcome::down("Host did not respond to ping"),
        Ok(Err(e)) => CheckOutcome::down(format!("Failed to run ping: {e}")),
        Err(_) => CheckOutcome::down(format!("Ping timeout after {secs} seconds")),
    }
}

/// Extract the round-trip time in milliseconds from `ping` output
pub fn parse_rtt(output: &str) -> Option<f64> {
    RTT_PATTERN
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|rtt| rtt.as_str().parse().ok())
}

async fn check_custom(run: &CustomCheck, timeout: Duration) -> CheckOutcome {
    match run {
        CustomCheck::Command(line) => run_shell(shell(line), "Command", timeout).await,
        CustomCheck::Script(contents) => {
            let script = match write_script(contents) {
                Ok(script) => script,
                Err(e) => return CheckOutcome::down(format!("Failed to prepare script: {e}")),
            };
            let invocation = format!("'{}'", script.display());
            trace!("running check script {}", script.display());

            // `script` is deleted when it goes out of scope, on every path
            run_shell(shell(&invocation), "Script", timeout).await
        }
    }
}

/// Write the script to a fresh executable temp file
fn write_script(contents: &str) -> std::io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("monitorix-check-")
        .suffix(if cfg!(windows) { ".bat" } else { ".sh" })
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))?;
    }

    // closes the handle so the file can be executed
    Ok(file.into_temp_path())
}

fn shell(line: &str) -> Command {
    let mut command = if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        command
    };
    command.stdin(Stdio::null()).kill_on_drop(true);
    command
}

async fn run_shell(mut command: Command, label: &str, timeout: Duration) -> CheckOutcome {
    let start = Instant::now();

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) if output.status.success() => CheckOutcome::up(Some(elapsed_ms(start))),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if !stderr.is_empty() {
                stderr
            } else if let Some(code) = output.status.code() {
                format!("{label} exited with code {code}")
            } else {
                format!("{label} was terminated by a signal")
            };

            CheckOutcome {
                response_time_ms: Some(elapsed_ms(start)),
                ..CheckOutcome::down(message)
            }
        }
        Ok(Err(e)) => CheckOutcome::down(format!("Failed to start {label}: {e}")),
        Err(_) => CheckOutcome::down(format!(
            "Custom check timeout after {} seconds",
            timeout.as_secs()
        )),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Error message including its sources, e.g. "error sending request: connection refused"
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
