use std::{path::PathBuf, process::Stdio, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tokio::{
        io::{AsyncRead, AsyncReadExt},
        process::{Child, Command},
    },
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Result of a finished external process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options controlling exec behavior.
#[derive(Debug, Clone)]
pub struct ExecOpts {
    pub timeout: Duration,
    /// Stdout cap; the head is kept.
    pub max_output_bytes: usize,
    /// Stderr cap; the tail is kept.
    pub max_stderr_bytes: usize,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 200 * 1024, // 200KB
            max_stderr_bytes: 16 * 1024,
            working_dir: None,
            env: Vec::new(),
        }
    }
}

/// Run `program` with `args` (no shell), capturing output, under a hard timeout.
///
/// On timeout the child and its process group are killed and reaped before
/// [`Error::Timeout`] is returned.
pub async fn run(program: &str, args: &[String], opts: &ExecOpts) -> Result<ExecResult> {
    debug!(
        program,
        ?args,
        timeout_secs = opts.timeout.as_secs(),
        "exec"
    );

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(ref dir) = opts.working_dir {
        cmd.current_dir(dir);
    }
    for (k, v) in &opts.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    // Own process group so ffmpeg children die with the downloader.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| Error::Spawn {
        program: program.to_string(),
        source,
    })?;
    // `kill_on_drop` only reaches the direct child; the guard takes the
    // whole group down if this future is dropped mid-run.
    let mut group = GroupGuard::new(&child);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let outcome = tokio::time::timeout(opts.timeout, async {
        tokio::join!(child.wait(), drain(stdout), drain(stderr))
    })
    .await;

    match outcome {
        Ok((Ok(status), stdout, stderr)) => {
            group.disarm();
            let stdout = truncate_head(
                String::from_utf8_lossy(&stdout).into_owned(),
                opts.max_output_bytes,
            );
            let stderr = truncate_tail(
                String::from_utf8_lossy(&stderr).into_owned(),
                opts.max_stderr_bytes,
            );
            let exit_code = status.code().unwrap_or(-1);
            debug!(
                program,
                exit_code,
                stdout_len = stdout.len(),
                stderr_len = stderr.len(),
                "exec done"
            );
            Ok(ExecResult {
                stdout,
                stderr,
                exit_code,
            })
        },
        Ok((Err(e), ..)) => {
            kill(&mut child).await;
            group.disarm();
            Err(Error::message(format!("failed to wait for {program}: {e}")))
        },
        Err(_) => {
            warn!(
                program,
                timeout_secs = opts.timeout.as_secs(),
                "exec timeout, killing"
            );
            kill(&mut child).await;
            group.disarm();
            Err(Error::Timeout(opts.timeout))
        },
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// Kills the child's process group when dropped, unless disarmed.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pid: child.id() }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid.take() {
            debug!(pid, "exec dropped, killing process group");
            let _ = std::process::Command::new("kill")
                .args(["-KILL", "--", &format!("-{pid}")])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

async fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Negative pid targets the whole group created by `process_group(0)`.
        let _ = Command::new("kill")
            .args(["-KILL", "--", &format!("-{pid}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "child already exited");
    }
    let _ = child.wait().await;
}

/// Keep the first `max` bytes, cut on a char boundary.
fn truncate_head(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s.push_str("\n... [output truncated]");
    s
}

/// Keep the last `max` bytes; downloader errors are printed last.
fn truncate_tail(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("[output truncated] ...\n{}", &s[start..])
}
