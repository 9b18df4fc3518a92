//! Bounded subprocess execution with output capture.
//!
//! Each stream of the child is read on its own thread and forwarded line by
//! line to the caller's [`Sink`] and to an in-memory buffer. The buffers are
//! embedded in the error when the run fails, since a live log cannot be
//! replayed.

use crate::error::{display_path, Cause, Error, Result};
use crate::sink::{log_lines, Sink};
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// How often the child is polled for exit while no output arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long output is still collected after the child exits. A background
/// process that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Default limit for a single compiler run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Convert a millisecond setting into a timeout; negative disables the limit.
pub fn timeout_from_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}

/// Text captured from a finished child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

enum Chunk {
    Out(String),
    Err(String),
}

impl ProcessOutput {
    fn record(&mut self, chunk: Chunk, sink: &dyn Sink) {
        match chunk {
            Chunk::Out(text) => {
                log_lines(&text).for_each(|line| sink.info(line));
                self.stdout.push_str(&text);
            }
            Chunk::Err(text) => {
                log_lines(&text).for_each(|line| sink.error(line));
                self.stderr.push_str(&text);
            }
        }
    }
}

/// A single program run: executable, arguments and time limit.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// `None` lets the child run without a limit.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Run to completion. Only exit code zero counts as success.
    pub fn run(&self, sink: &dyn Sink) -> Result<ProcessOutput> {
        let mut output = ProcessOutput::default();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(&output, Cause::Startup(e)))?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone(), Chunk::Out);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx, Chunk::Err);
        }

        let status = match self.wait(&mut child, &rx, &mut output, sink) {
            Ok(status) => status,
            Err(cause) => {
                let _ = child.kill();
                let _ = child.wait();
                while let Ok(chunk) = rx.try_recv() {
                    output.record(chunk, sink);
                }
                return Err(self.failure(&output, cause));
            }
        };

        drain(&rx, &mut output, sink);

        if status.success() {
            Ok(output)
        } else {
            Err(self.failure(&output, Cause::Exit { code: status.code() }))
        }
    }

    fn wait(
        &self,
        child: &mut Child,
        rx: &Receiver<Chunk>,
        output: &mut ProcessOutput,
        sink: &dyn Sink,
    ) -> std::result::Result<ExitStatus, Cause> {
        let start = Instant::now();
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => output.record(chunk, sink),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
            }

            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if let Some(limit) = self.timeout {
                if start.elapsed() >= limit {
                    return Err(Cause::Timeout(limit));
                }
            }
        }
    }

    fn failure(&self, output: &ProcessOutput, cause: Cause) -> Error {
        let name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_path(&self.program));
        Error::with_cause(
            format!(
                "Fail to execute {} command: {}{}",
                name, output.stderr, output.stdout
            ),
            cause,
        )
    }
}

/// Collect what the readers still hold, until both pipes close or
/// [`DRAIN_GRACE`] runs out.
fn drain(rx: &Receiver<Chunk>, output: &mut ProcessOutput, sink: &dyn Sink) {
    let deadline = Instant::now() + DRAIN_GRACE;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(chunk) => output.record(chunk, sink),
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                log::debug!("output pipes still open after exit; not waiting further");
                return;
            }
        }
    }
}

fn spawn_reader<R>(stream: R, tx: Sender<Chunk>, wrap: fn(String) -> Chunk)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(wrap(text)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{write_script, RecordingSink};
    use tempfile::TempDir;

    #[test]
    fn negative_millis_disable_timeout() {
        assert_eq!(timeout_from_millis(-1), None);
        assert_eq!(timeout_from_millis(0), Some(Duration::ZERO));
        assert_eq!(timeout_from_millis(2_000), Some(Duration::from_secs(2)));
    }

    #[test]
    fn captures_and_tees_both_streams() {
        let temp = TempDir::new().unwrap();
        let script = write_script(
            temp.path(),
            "talk.sh",
            "echo out-line\necho err-line >&2\necho \"args: $*\"\n",
        );

        let sink = RecordingSink::default();
        let out = Invocation::new(&script)
            .args(["a", "b"])
            .run(&sink)
            .unwrap();

        assert!(out.stdout.contains("out-line"));
        assert!(out.stdout.contains("args: a b"));
        assert_eq!(out.stderr.trim(), "err-line");
        assert!(sink.infos().contains(&"out-line".to_string()));
        assert_eq!(sink.errors(), vec!["err-line".to_string()]);
    }

    #[test]
    fn non_zero_exit_embeds_captured_text() {
        let temp = TempDir::new().unwrap();
        let script = write_script(
            temp.path(),
            "fail.sh",
            "echo 'invalid attribute ID' >&2\necho partial\nexit 2\n",
        );

        let err = Invocation::new(&script).run(&RecordingSink::default()).unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.message().starts_with("Fail to execute fail.sh command: "));
        assert!(err.message().contains("invalid attribute ID"));
        assert!(err.message().contains("partial"));
    }

    #[test]
    fn missing_program_is_a_startup_failure() {
        let temp = TempDir::new().unwrap();
        let err = Invocation::new(temp.path().join("absent"))
            .run(&RecordingSink::default())
            .unwrap_err();
        assert!(matches!(err.cause(), Some(Cause::Startup(_))));
    }

    #[test]
    fn timeout_kills_slow_child() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "slow.sh", "echo started\nexec sleep 5\n");

        let start = Instant::now();
        let err = Invocation::new(&script)
            .timeout(Some(Duration::from_millis(300)))
            .run(&RecordingSink::default())
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(
            err.cause().unwrap().to_string(),
            "process timed out after 300ms"
        );
    }

    #[test]
    fn disabled_timeout_lets_child_finish() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "nap.sh", "sleep 1\necho done\n");

        let out = Invocation::new(&script)
            .timeout(None)
            .run(&RecordingSink::default())
            .unwrap();
        assert_eq!(out.stdout.trim(), "done");
    }

    #[test]
    fn background_child_holding_pipes_does_not_block() {
        let temp = TempDir::new().unwrap();
        let script = write_script(
            temp.path(),
            "detach.sh",
            "sleep 4 &\necho spawned\nexit 0\n",
        );

        for timeout in [Some(Duration::from_millis(300)), None] {
            let start = Instant::now();
            let out = Invocation::new(&script)
                .timeout(timeout)
                .run(&RecordingSink::default())
                .unwrap();
            assert!(start.elapsed() < Duration::from_secs(2));
            assert_eq!(out.stdout.trim(), "spawned");
        }
    }
}
