use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

/// Best-effort scan of the process table for one agent binary.
///
/// Every external tool runs under a hard timeout; a missing tool, a failure
/// or a timeout all read as "no such process".
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    binary: String,
    timeout: Duration,
}

impl ProcessProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Working directories of every process named after the binary.
    pub async fn running_cwds(&self) -> Vec<PathBuf> {
        let mut cwds = Vec::new();
        for pid in self.pids().await {
            if let Some(cwd) = self.cwd_of(pid).await {
                if !cwds.contains(&cwd) {
                    cwds.push(cwd);
                }
            }
        }
        debug!(binary = %self.binary, count = cwds.len(), "Probed running agent processes");
        cwds
    }

    async fn pids(&self) -> Vec<u32> {
        let Some(stdout) = self.run("pgrep", &["-x", &self.binary]).await else {
            return Vec::new();
        };
        stdout
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    async fn cwd_of(&self, pid: u32) -> Option<PathBuf> {
        if let Ok(cwd) = tokio::fs::read_link(format!("/proc/{}/cwd", pid)).await {
            return Some(cwd);
        }

        // No procfs (macOS): lsof prints the cwd as an `n<path>` field.
        let pid = pid.to_string();
        let stdout = self
            .run("lsof", &["-a", "-p", &pid, "-d", "cwd", "-Fn"])
            .await?;
        parse_lsof_cwd(&stdout)
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                trace!(program, error = %e, "Process probe unavailable");
                None
            }
            Err(_) => {
                debug!(program, timeout_ms = self.timeout.as_millis(), "Process probe timed out");
                None
            }
        }
    }
}

fn parse_lsof_cwd(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsof_cwd() {
        let out = "p4242\nfcwd\nn/Users/dev/my-project\n";
        assert_eq!(
            parse_lsof_cwd(out),
            Some(PathBuf::from("/Users/dev/my-project"))
        );
        assert_eq!(parse_lsof_cwd("p4242\n"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_running() {
        let probe = ProcessProbe::new("agentwatch-no-such-binary-xyz")
            .with_timeout(Duration::from_millis(500));
        assert!(probe.running_cwds().await.is_empty());
    }
}
