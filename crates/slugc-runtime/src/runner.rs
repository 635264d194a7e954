use crate::process::kill_process_group;
use crate::RuntimeError;

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on retained output, in bytes. Older lines are dropped first.
pub const CAPTURE_LIMIT: usize = 256 * 1024;

const READ_CHUNK: usize = 4096;
const CHANNEL_DEPTH: usize = 256;
const KILL_GRACE: Duration = Duration::from_secs(5);
/// How long output may stay open after the child exits. A background
/// process that still holds the pipes after this is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// A command to execute: program, arguments, environment overrides and
/// working directory. The child inherits the ambient environment with
/// `env` layered on top.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Result of a command that ran to completion (successfully or not).
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub status: ExitStatus,
    pub lines: Vec<OutputLine>,
    /// `true` when early output was discarded to stay under [`CAPTURE_LIMIT`].
    pub truncated: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Both streams interleaved in arrival order.
    pub fn combined(&self) -> String {
        join_lines(self.lines.iter())
    }

    pub fn stdout(&self) -> String {
        join_lines(self.lines.iter().filter(|l| l.stream == Stream::Stdout))
    }

    /// The last `n` lines of combined output.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines[skip..].iter().map(|l| l.text.as_str()).collect()
    }
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a OutputLine>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.text);
        out.push('\n');
    }
    out
}

/// Executes commands under a wall-clock deadline.
///
/// Every output line is handed to `sink` as it arrives. A command that exits
/// non-zero is still `Ok`; only spawn failures, I/O failures and deadline
/// expiry are errors.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        sink: Option<&dyn Fn(&str)>,
    ) -> Result<RunOutput, RuntimeError>;
}

/// [`CommandRunner`] backed by real child processes.
///
/// The child leads its own process group so that expiry can terminate it
/// together with its descendants.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

enum Event {
    Line(OutputLine),
    Closed,
    Exited(io::Result<ExitStatus>),
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        sink: Option<&dyn Fn(&str)>,
    ) -> Result<RunOutput, RuntimeError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        debug!("running {spec} (timeout {}s)", timeout.as_secs());
        let deadline = Instant::now() + timeout;
        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            program: spec.program_name(),
            source,
        })?;
        let pid = child.id();

        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let mut open_streams = 0usize;
        if let Err(e) = attach_pipes(&mut child, &tx, &mut open_streams)
            .and_then(|()| spawn_waiter(child, tx))
        {
            kill_process_group(pid);
            return Err(e.into());
        }

        let mut capture = Capture::new(CAPTURE_LIMIT);
        let mut status: Option<ExitStatus> = None;
        let mut drain_until: Option<Instant> = None;
        loop {
            if status.is_some() && open_streams == 0 {
                break;
            }
            let now = Instant::now();
            let wait = match drain_until {
                Some(until) if now >= until => {
                    debug!("{spec} exited with output still held open, killing process group {pid}");
                    kill_process_group(pid);
                    break;
                }
                Some(until) => until - now,
                None => {
                    let remaining = deadline.saturating_duration_since(now);
                    if remaining.is_zero() {
                        return Err(expire(spec, pid, timeout, status, &rx, capture));
                    }
                    remaining
                }
            };
            match rx.recv_timeout(wait) {
                Ok(Event::Line(line)) => {
                    if let Some(sink) = sink {
                        sink(&line.text);
                    }
                    capture.push(line);
                }
                Ok(Event::Closed) => open_streams = open_streams.saturating_sub(1),
                Ok(Event::Exited(result)) => {
                    status = Some(result?);
                    drain_until = Some(Instant::now() + DRAIN_GRACE);
                }
                Err(RecvTimeoutError::Timeout) if drain_until.is_some() => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(expire(spec, pid, timeout, status, &rx, capture));
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status =
            status.ok_or_else(|| io::Error::other(format!("lost exit status of pid {pid}")))?;
        debug!("{spec} exited with {status}");
        Ok(RunOutput {
            status,
            truncated: capture.truncated,
            lines: capture.lines.into(),
        })
    }
}

fn attach_pipes(
    child: &mut Child,
    tx: &SyncSender<Event>,
    open_streams: &mut usize,
) -> io::Result<()> {
    if let Some(out) = child.stdout.take() {
        spawn_reader(out, Stream::Stdout, tx.clone())?;
        *open_streams += 1;
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(err, Stream::Stderr, tx.clone())?;
        *open_streams += 1;
    }
    Ok(())
}

/// Read `pipe` in fixed-size chunks and forward complete lines. A partial
/// line that fills a whole chunk is flushed as-is so one unterminated line
/// cannot grow without bound.
fn spawn_reader<R>(mut pipe: R, stream: Stream, tx: SyncSender<Event>) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    let name = match stream {
        Stream::Stdout => "slugc-stdout",
        Stream::Stderr => "slugc-stderr",
    };
    thread::Builder::new().name(name.to_owned()).spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        if send_line(&tx, stream, &line[..pos]).is_err() {
                            return;
                        }
                    }
                    if pending.len() >= READ_CHUNK {
                        let line = std::mem::take(&mut pending);
                        if send_line(&tx, stream, &line).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("{name} read failed: {e}");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            let _ = send_line(&tx, stream, &pending);
        }
        let _ = tx.send(Event::Closed);
    })?;
    Ok(())
}

fn send_line(
    tx: &SyncSender<Event>,
    stream: Stream,
    bytes: &[u8],
) -> Result<(), mpsc::SendError<Event>> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    tx.send(Event::Line(OutputLine {
        stream,
        text: String::from_utf8_lossy(bytes).into_owned(),
    }))
}

fn spawn_waiter(mut child: Child, tx: SyncSender<Event>) -> io::Result<()> {
    thread::Builder::new()
        .name("slugc-wait".to_owned())
        .spawn(move || {
            let _ = tx.send(Event::Exited(child.wait()));
        })?;
    Ok(())
}

/// Kill the process group, then give the waiter a short grace period to
/// confirm termination while still collecting output.
fn expire(
    spec: &CommandSpec,
    pid: u32,
    timeout: Duration,
    status: Option<ExitStatus>,
    rx: &Receiver<Event>,
    mut capture: Capture,
) -> RuntimeError {
    warn!("{spec} exceeded {}s, killing process group {pid}", timeout.as_secs());
    kill_process_group(pid);

    let mut confirmed = status.is_some();
    let grace = Instant::now() + KILL_GRACE;
    while !confirmed {
        let remaining = grace.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(Event::Line(line)) => capture.push(line),
            Ok(Event::Closed) => {}
            Ok(Event::Exited(_)) => confirmed = true,
            Err(_) => break,
        }
    }
    if !confirmed {
        warn!("process group {pid} did not exit within the kill grace period");
    }

    RuntimeError::Timeout {
        program: spec.program_name(),
        timeout,
        exit_code: status.and_then(|s| s.code()),
        output: join_lines(capture.lines.iter()),
    }
}

struct Capture {
    lines: VecDeque<OutputLine>,
    bytes: usize,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, line: OutputLine) {
        self.bytes += line.text.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.limit && self.lines.len() > 1 {
            if let Some(old) = self.lines.pop_front() {
                self.bytes -= old.text.len() + 1;
                self.truncated = true;
            }
        }
    }
}
