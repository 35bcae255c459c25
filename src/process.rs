use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub fn run_capture(program: &str, args: &[String], timeout_seconds: Option<u64>) -> Result<Vec<u8>> {
    debug!(program, ?args, ?timeout_seconds, "spawning helper");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {program}"))?;

    let output = match timeout_seconds {
        Some(secs) if secs > 0 => wait_with_timeout(program, &mut child, Duration::from_secs(secs))?,
        _ => child
            .wait_with_output()
            .with_context(|| format!("waiting for {program}"))?,
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        bail!("{program} exited with {}: {}", output.status, stderr.trim());
    }
    if !stderr.trim().is_empty() {
        debug!(program, stderr = %stderr.trim(), "helper wrote to stderr");
    }

    Ok(output.stdout)
}

pub fn run_json<O: for<'de> serde::Deserialize<'de>>(
    program: &str,
    args: &[String],
    timeout_seconds: Option<u64>,
) -> Result<O> {
    let stdout = run_capture(program, args, timeout_seconds)?;
    serde_json::from_slice(&stdout).with_context(|| format!("parsing JSON output of {program}"))
}

pub fn expand_tilde(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
// A grandchild that inherited the pipes can keep them open after the child
// is gone; readers are abandoned after this long.
const PIPE_GRACE: Duration = Duration::from_secs(2);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn collect(program: &str, stream: &str, rx: &Receiver<Vec<u8>>) -> Vec<u8> {
    rx.recv_timeout(PIPE_GRACE).unwrap_or_else(|_| {
        warn!("{program}: {stream} still open after exit; dropping it");
        Vec::new()
    })
}

fn wait_with_timeout(program: &str, child: &mut Child, timeout: Duration) -> Result<Output> {
    // Both pipes are drained concurrently; a full pipe would stall the child.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait().with_context(|| format!("polling {program}"))? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            warn!("{program} exceeded {}s; killing it", timeout.as_secs());
            let _ = child.kill();
            child.wait().with_context(|| format!("reaping {program}"))?;
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = collect(program, "stdout", &stdout);
    let stderr = collect(program, "stderr", &stderr);
    match status {
        Some(status) => Ok(Output {
            status,
            stdout,
            stderr,
        }),
        None => bail!(
            "{program} timed out after {}s: {}",
            timeout.as_secs(),
            String::from_utf8_lossy(&stderr).trim()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn stdout_is_returned_within_the_timeout() {
        let out = run_capture("sh", &sh("printf '[1, 2]'"), Some(5)).unwrap();
        assert_eq!(out, b"[1, 2]");
        let parsed: Vec<u32> = run_json("sh", &sh("printf '[1, 2]'"), Some(5)).unwrap();
        assert_eq!(parsed, vec![1, 2]);
    }

    #[test]
    fn failure_carries_stderr() {
        let err = run_capture("sh", &sh("echo broken >&2; exit 3"), Some(5)).unwrap_err();
        assert!(err.to_string().contains("broken"), "{err:#}");
    }

    #[test]
    fn timeout_returns_even_when_a_grandchild_holds_the_pipes() {
        let started = Instant::now();
        let err = run_capture("sh", &sh("sleep 30 & sleep 30"), Some(1)).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err:#}");
        assert!(started.elapsed() < Duration::from_secs(15));
    }
}
