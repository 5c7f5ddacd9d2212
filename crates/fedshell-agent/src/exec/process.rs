//! Spawned shell processes and their stdio relay.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use fedshell_proto::v1::{self as pb, ExecRequest, ExecResponse, exec_request, exec_response};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, info, instrument, warn};

use super::error::ExecError;

/// Responses queued towards the console before the output pumps wait.
pub const OUTPUT_BUFFER: usize = 32;

const READ_CHUNK: usize = 8192;
const STDIN_BUFFER: usize = 32;
/// How long output pipes may stay open after the process exits, e.g. when
/// a background child inherited them.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_ROWS: u32 = 24;
const DEFAULT_COLS: u32 = 80;

type Outbound = mpsc::Sender<Result<ExecResponse, Status>>;

/// A started shell process.
pub struct SpawnedShell {
    child: Child,
    pid: u32,
    program: String,
}

impl SpawnedShell {
    /// Spawn `start.command` with piped stdio.
    pub fn spawn(start: &pb::ExecStart) -> Result<Self, ExecError> {
        let (program, args) = start
            .command
            .split_first()
            .ok_or(ExecError::EmptyCommand)?;
        let (rows, cols) = start.initial_size.as_ref().map_or(
            (DEFAULT_ROWS, DEFAULT_COLS),
            |size| {
                (
                    if size.rows == 0 { DEFAULT_ROWS } else { size.rows },
                    if size.cols == 0 { DEFAULT_COLS } else { size.cols },
                )
            },
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("TERM", "xterm-256color")
            .env("COLUMNS", cols.to_string())
            .env("LINES", rows.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecError::ProgramNotFound(program.clone())
            } else {
                ExecError::SpawnFailed {
                    program: program.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        let pid = child.id().ok_or_else(|| ExecError::SpawnFailed {
            program: program.clone(),
            reason: "process exited before it could be tracked".into(),
        })?;

        info!(
            pid,
            program = %program,
            container = %start.container,
            session_id = %start.session_id,
            rows,
            cols,
            "Spawned shell process"
        );
        Ok(Self {
            child,
            pid,
            program: program.clone(),
        })
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Relay `requests` into the process and its output into `tx` until it
    /// exits, then send `ExitStatus` once both output pipes are drained.
    ///
    /// The process is killed when `requests` ends first.
    #[instrument(skip_all, fields(pid = self.pid, program = %self.program))]
    pub async fn run<S>(mut self, mut requests: S, tx: Outbound)
    where
        S: Stream<Item = Result<ExecRequest, Status>> + Unpin + Send,
    {
        let pumps: Vec<JoinHandle<()>> = [
            self.child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump(out, tx.clone(), exec_response::Payload::Stdout))),
            self.child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump(err, tx.clone(), exec_response::Payload::Stderr))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(STDIN_BUFFER);
        if let Some(stdin) = self.child.stdin.take() {
            tokio::spawn(write_stdin(stdin, stdin_rx));
        }

        let mut requests_open = true;
        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,
                request = requests.next(), if requests_open => match request {
                    Some(Ok(request)) => self.apply(request, &stdin_tx).await,
                    Some(Err(status)) => {
                        debug!(error = %status, "Request stream failed");
                        requests_open = false;
                        self.kill();
                    }
                    None => {
                        debug!("Request stream ended before exit");
                        requests_open = false;
                        self.kill();
                    }
                },
            }
        };
        drop(stdin_tx);

        for mut pump in pumps {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut pump)
                .await
                .is_err()
            {
                warn!("Output pipe still open after exit");
                pump.abort();
            }
        }

        let exit = match status {
            Ok(status) => {
                let code = exit_code(status);
                info!(code, "Shell process exited");
                pb::ExitStatus {
                    code,
                    message: status.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to wait for shell process");
                pb::ExitStatus {
                    code: -1,
                    message: e.to_string(),
                }
            }
        };
        let response = ExecResponse {
            payload: Some(exec_response::Payload::Exit(exit)),
        };
        if tx.send(Ok(response)).await.is_err() {
            debug!("Console gone before exit status");
        }
    }

    async fn apply(&self, request: ExecRequest, stdin: &mpsc::Sender<Vec<u8>>) {
        match request.payload {
            Some(exec_request::Payload::Stdin(data)) => {
                if stdin.send(data).await.is_err() {
                    debug!("Stdin closed, dropping input");
                }
            }
            Some(exec_request::Payload::Resize(size)) => {
                // Pipes carry no window size.
                debug!(rows = size.rows, cols = size.cols, "Terminal resized");
            }
            Some(exec_request::Payload::Signal(raw)) => self.deliver(raw),
            Some(exec_request::Payload::Start(_)) => warn!("Ignoring repeated start request"),
            None => {}
        }
    }

    fn deliver(&self, raw: i32) {
        let Some(sig) = pb::Signal::try_from(raw).ok().and_then(to_nix_signal) else {
            warn!(signal = raw, "Ignoring unsupported signal");
            return;
        };
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(self.pid as i32);
        match signal::kill(pid, sig) {
            Ok(()) => debug!(signal = %sig, "Delivered signal"),
            Err(e) => debug!(signal = %sig, error = %e, "Signal delivery failed"),
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "Kill failed");
        }
    }
}

const fn to_nix_signal(signal: pb::Signal) -> Option<Signal> {
    match signal {
        pb::Signal::Unspecified => None,
        pb::Signal::Interrupt => Some(Signal::SIGINT),
        pb::Signal::Terminate => Some(Signal::SIGTERM),
        pb::Signal::Kill => Some(Signal::SIGKILL),
        pb::Signal::Hangup => Some(Signal::SIGHUP),
        pb::Signal::Quit => Some(Signal::SIGQUIT),
    }
}

/// Exit code reported to the console; `128 + signo` for signal deaths.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(-1)
}

async fn pump<R>(mut reader: R, tx: Outbound, wrap: fn(Vec<u8>) -> exec_response::Payload)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let response = ExecResponse {
                    payload: Some(wrap(buf[..n].to_vec())),
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output pipe failed");
                break;
            }
        }
    }
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = stdin.write_all(&data).await {
            debug!(error = %e, "Stdin write failed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(error = %e, "Stdin flush failed");
            break;
        }
    }
}
