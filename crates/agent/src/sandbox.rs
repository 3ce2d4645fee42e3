//! Isolated Python execution
//!
//! Every run gets a fresh interpreter in a fresh temporary directory with a
//! cleared environment, kernel resource limits and syscall filters. Snippets
//! reach the database through `execute_clickhouse_query`, which the prelude
//! forwards over a per-run Unix socket to the registered query tool.

use analyst_config::SandboxConfig;
use seccompiler::BpfProgram;
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace, warn};

use crate::seccomp::{self, SyscallFilters};
use crate::tools::ToolTrait;

const PRELUDE: &str = include_str!("prelude.py");
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STDERR_DIVIDER: &str = "--- stderr ---";
const NO_OUTPUT: &str = "(no output)";
const MAX_REQUEST_BYTES: usize = 256 * 1024;

/// Sandbox failures
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("could not start the interpreter: {0}")]
    Spawn(io::Error),

    #[error("could not build the syscall filter: {0}")]
    Filter(String),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("execution timed out after {0}s")]
    Timeout(u64),

    #[error("memory limit exceeded")]
    MemoryExceeded,

    #[error("interpreter killed by signal {0}")]
    Killed(i32),

    #[error("{stderr}")]
    Failed { stderr: String },
}

#[derive(Deserialize)]
struct BridgeRequest {
    query: String,
}

/// Runs untrusted snippets
pub struct CodeSandbox {
    python: String,
    timeout: Duration,
    memory_bytes: u64,
    max_output_bytes: usize,
    query_tool: Option<Arc<dyn ToolTrait>>,
}

impl CodeSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            python: config.python.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            memory_bytes: config.memory_mb.saturating_mul(1024 * 1024),
            max_output_bytes: config.max_output_bytes,
            query_tool: None,
        }
    }

    /// Route in-sandbox queries to this tool
    pub fn with_query_tool(mut self, tool: Arc<dyn ToolTrait>) -> Self {
        self.query_tool = Some(tool);
        self
    }

    pub fn has_query_tool(&self) -> bool {
        self.query_tool.is_some()
    }

    /// Check that the interpreter starts at all
    pub async fn is_available(&self) -> bool {
        let probe = Command::new(&self.python)
            .args(["-E", "-B", "-c", "import ctypes"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("◆ INTERPRETER PROBE FAILED: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    /// Execute one snippet and return its captured output
    pub async fn run(&self, code: &str) -> Result<String, SandboxError> {
        let filters = SyscallFilters::build().map_err(SandboxError::Filter)?;

        let workdir = tempfile::Builder::new()
            .prefix("analyst-sandbox-")
            .tempdir()?;
        let dir = workdir.path();
        tokio::fs::write(dir.join("prelude.py"), PRELUDE).await?;
        tokio::fs::write(dir.join("snippet.py"), code).await?;
        tokio::fs::write(dir.join("seccomp.bpf"), seccomp::to_bytes(&filters.exec)).await?;

        let socket_path = dir.join("query.sock");
        let listener = UnixListener::bind(&socket_path)?;
        // Stops serving on every exit path, including a dropped run future
        let _bridge = AbortOnDropHandle::new(tokio::spawn(serve_queries(
            listener,
            self.query_tool.clone(),
        )));

        let mut command = self.command(dir, &socket_path, filters.spawn);
        let child = command.spawn().map_err(SandboxError::Spawn)?;

        debug!("◆ SANDBOX RUN IN {:?}", dir);
        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        // Dropping the timed-out future drops the child, which kills it
        let output = match waited {
            Ok(output) => output?,
            Err(_) => {
                warn!("◆ SANDBOX TIMEOUT AFTER {}s", self.timeout.as_secs());
                return Err(SandboxError::Timeout(self.timeout.as_secs()));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(truncate(
                format_output(&stdout, &stderr),
                self.max_output_bytes,
            ));
        }

        if stderr.contains("MemoryError") {
            return Err(SandboxError::MemoryExceeded);
        }
        if let Some(signal) = output.status.signal() {
            return Err(SandboxError::Killed(signal));
        }
        Err(SandboxError::Failed {
            stderr: truncate(stderr.trim_end().to_string(), self.max_output_bytes),
        })
    }

    fn command(&self, dir: &Path, socket_path: &Path, filters: Vec<BpfProgram>) -> Command {
        let mut command = Command::new(&self.python);
        command
            .args(["-E", "-B", "prelude.py", "snippet.py"])
            .current_dir(dir)
            .env_clear()
            .env("HOME", dir)
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("PYTHONIOENCODING", "utf-8")
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("OMP_NUM_THREADS", "1")
            .env("ANALYST_QUERY_SOCKET", socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        apply_limits(&mut command, self.memory_bytes, self.timeout.as_secs(), filters);
        command
    }
}

/// Cap address space and CPU time in the child, then load the spawn-stage
/// syscall filters
fn apply_limits(command: &mut Command, memory_bytes: u64, cpu_secs: u64, filters: Vec<BpfProgram>) {
    // SAFETY: runs in the forked child before exec. setrlimit and the seccomp
    // prctl calls are async-signal-safe and the filters were compiled in the
    // parent, so the closure allocates nothing.
    unsafe {
        command.pre_exec(move || {
            let memory = libc::rlimit {
                rlim_cur: memory_bytes as libc::rlim_t,
                rlim_max: memory_bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &memory) != 0 {
                return Err(io::Error::last_os_error());
            }

            let cpu = libc::rlimit {
                rlim_cur: cpu_secs as libc::rlim_t,
                rlim_max: cpu_secs as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                return Err(io::Error::last_os_error());
            }
            seccomp::apply(&filters)
        });
    }
}

async fn serve_queries(listener: UnixListener, tool: Option<Arc<dyn ToolTrait>>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("◆ QUERY BRIDGE ACCEPT FAILED: {}", e);
                return;
            }
        };
        if let Err(e) = answer_query(stream, tool.as_deref()).await {
            debug!("◆ QUERY BRIDGE CONNECTION ERROR: {}", e);
        }
    }
}

async fn answer_query(stream: UnixStream, tool: Option<&dyn ToolTrait>) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read).take(MAX_REQUEST_BYTES as u64 + 1);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;

    if line.len() > MAX_REQUEST_BYTES {
        warn!("◆ QUERY BRIDGE REQUEST OVER {} BYTES", MAX_REQUEST_BYTES);
        // Discard the rest in fixed-size chunks so the writer can finish
        tokio::io::copy(&mut reader.into_inner(), &mut tokio::io::sink()).await?;
        let reply = json!({
            "error": format!("Error: query request exceeds {} bytes.", MAX_REQUEST_BYTES)
        });
        write.write_all(format!("{}\n", reply).as_bytes()).await?;
        return write.shutdown().await;
    }

    let reply = match serde_json::from_slice::<BridgeRequest>(&line) {
        Ok(request) => match tool {
            Some(tool) => {
                trace!("◆ BRIDGED QUERY: {}", request.query);
                match tool.execute(json!({"query": request.query})).await {
                    Ok(rows) => json!({"ok": rows}),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            None => json!({
                "error": "Error: execute_clickhouse_query is not available in this session."
            }),
        },
        Err(e) => json!({"error": format!("Error: malformed query request: {}", e)}),
    };

    write.write_all(format!("{}\n", reply).as_bytes()).await?;
    write.shutdown().await
}

fn format_output(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.trim().is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(STDERR_DIVIDER);
        output.push('\n');
        output.push_str(stderr);
    }
    if output.is_empty() {
        return NO_OUTPUT.to_string();
    }
    output
}

fn truncate(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str(&format!("\n[output truncated at {} bytes]", max_bytes));
    text
}
