//! Progress output for playbook runs
//!
//! Progress lines are meant for the person watching a run and are kept apart
//! from `tracing` diagnostics. The log writes to any sink: stdout in the
//! CLI, a [`SharedBuffer`] in tests.

use chrono::Local;
use colored::Colorize;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use crate::resources::TaskCounters;

/// Terminal state of one host in one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Success,
    Skip,
    Ignore,
    Failed,
}

impl HostState {
    fn label(self) -> &'static str {
        match self {
            HostState::Success => "success",
            HostState::Skip => "skip",
            HostState::Ignore => "ignore",
            HostState::Failed => "failed",
        }
    }
}

/// Line-oriented progress writer, cheap to clone
#[derive(Clone)]
pub struct ProgressLog {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    color: bool,
}

impl fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressLog").field("color", &self.color).finish()
    }
}

impl ProgressLog {
    /// Write progress to `sink`
    pub fn new(sink: impl Write + Send + 'static, color: bool) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            color,
        }
    }

    /// Progress on stdout
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }

    /// Discard all progress
    pub fn sink() -> Self {
        Self::new(io::sink(), false)
    }

    fn now() -> String {
        Local::now().format("%H:%M:%S %Z").to_string()
    }

    fn line(&self, text: &str) {
        let mut sink = self.sink.lock();
        // Progress output is best effort; a closed stdout must not fail a run.
        let _ = writeln!(sink, "{}", text);
        let _ = sink.flush();
    }

    /// `<time> [Playbook <name>] start`
    pub fn playbook_start(&self, name: &str) {
        self.line(&format!("{} [Playbook {}] start", Self::now(), name));
    }

    /// `<time> [<role>] <task>`
    pub fn task_start(&self, role: Option<&str>, task: &str) {
        let prefix = role.map(|r| format!("[{}] ", r)).unwrap_or_default();
        self.line(&format!("{} {}{}", Self::now(), prefix, task));
    }

    /// `[<host padded>] <state>`
    pub fn host_result(&self, host: &str, width: usize, state: HostState) {
        let padding = " ".repeat(width.saturating_sub(host.len()));
        if self.color {
            let label = match state {
                HostState::Success | HostState::Skip | HostState::Ignore => state.label().blue(),
                HostState::Failed => state.label().red(),
            };
            self.line(&format!("[{}]{} {}", host.cyan(), padding, label));
        } else {
            self.line(&format!("[{}]{} {}", host, padding, state.label()));
        }
    }

    /// Free-form line, used for play level notices
    pub fn message(&self, text: &str) {
        self.line(&format!("{} {}", Self::now(), text));
    }

    /// `<time> [Playbook <name>] finish. total: N,success: N,ignored: N,failed: N`
    pub fn playbook_finish(&self, name: &str, counters: &TaskCounters) {
        self.line(&format!(
            "{} [Playbook {}] finish. total: {},success: {},ignored: {},failed: {}",
            Self::now(),
            name,
            counters.total,
            counters.success,
            counters.ignored,
            counters.failed
        ));
    }
}

/// In-memory sink whose contents can be read back
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
