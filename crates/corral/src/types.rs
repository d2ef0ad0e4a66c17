use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Definition of a supervised command: identity plus the policy governing
/// its lifecycle. Durations are stored as integer fields so the whole spec
/// round-trips through config files; use the accessor methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
	pub name: String,
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub dir: Option<PathBuf>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default)]
	pub autostart: bool,
	#[serde(default)]
	pub restart_policy: RestartPolicy,
	#[serde(default = "default_start_retries")]
	pub start_retries: u32,
	#[serde(default = "default_start_delay_ms")]
	pub start_delay_ms: u64,
	#[serde(default = "default_start_timeout_ms")]
	pub start_timeout_ms: u64,
	#[serde(default)]
	pub stop_signal: StopSignal,
	#[serde(default = "default_stop_timeout_ms")]
	pub stop_timeout_ms: u64,
}

fn default_start_retries() -> u32 {
	3
}
fn default_start_delay_ms() -> u64 {
	100
}
fn default_start_timeout_ms() -> u64 {
	10_000
}
fn default_stop_timeout_ms() -> u64 {
	5_000
}

impl ProcessSpec {
	/// A spec with default policy, no args, no env.
	pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			command: command.into(),
			args: Vec::new(),
			dir: None,
			env: HashMap::new(),
			autostart: false,
			restart_policy: RestartPolicy::default(),
			start_retries: default_start_retries(),
			start_delay_ms: default_start_delay_ms(),
			start_timeout_ms: default_start_timeout_ms(),
			stop_signal: StopSignal::default(),
			stop_timeout_ms: default_stop_timeout_ms(),
		}
	}

	/// Interval between readiness polls during Start.
	pub fn start_delay(&self) -> Duration {
		Duration::from_millis(self.start_delay_ms)
	}

	/// Upper bound on the whole Start call.
	pub fn start_timeout(&self) -> Duration {
		Duration::from_millis(self.start_timeout_ms)
	}

	/// How long Stop waits after the stop signal before force-killing.
	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}
}

/// Derived process status — never stored, always computed from the runtime
/// snapshot at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
	Unknown,
	Starting,
	Running,
	Stopped,
	Failed,
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running | ProcessState::Starting)
	}
}

impl std::fmt::Display for ProcessState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			ProcessState::Unknown => "unknown",
			ProcessState::Starting => "starting",
			ProcessState::Running => "running",
			ProcessState::Stopped => "stopped",
			ProcessState::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// Policy classifying whether an exited process is eligible for restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
	Always,
	#[default]
	OnFailure,
	Never,
}

/// Signal sent to a process on Stop. KILL is sent as an unconditional kill,
/// never a soft signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
	Int,
	Quit,
	#[default]
	Term,
	Kill,
}

impl StopSignal {
	pub fn signal(&self) -> nix::sys::signal::Signal {
		use nix::sys::signal::Signal;
		match self {
			StopSignal::Int => Signal::SIGINT,
			StopSignal::Quit => Signal::SIGQUIT,
			StopSignal::Term => Signal::SIGTERM,
			StopSignal::Kill => Signal::SIGKILL,
		}
	}
}

/// Observed exit of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
	/// Exit code, `None` when the process was terminated by a signal.
	pub code: Option<i32>,
	pub success: bool,
}

impl ExitOutcome {
	pub fn from_status(status: std::process::ExitStatus) -> Self {
		Self {
			code: status.code(),
			success: status.success(),
		}
	}
}

/// Row shape the persistence store deals in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
	pub name: String,
	pub path: String,
	pub pid: u32,
}

/// Point-in-time copy of one registry entry, as returned by
/// `Supervisor::list_processes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
	pub name: String,
	pub pid: Option<u32>,
	pub state: ProcessState,
}
