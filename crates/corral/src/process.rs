//! The process lifecycle state machine.
//!
//! One `ManagedProcess` owns at most one native process at a time. The
//! lifecycle mutex is held for the full duration of start/stop so those
//! never race on the same entity; the runtime snapshot lives behind its own
//! read/write lock so `state()` stays cheap and callable mid-operation.

use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, warn};

use crate::error::{ProcessError, Result};
use crate::output::OutputCapture;
use crate::types::{ExitOutcome, ProcessSpec, ProcessState, StopSignal};

/// Poll interval when waiting on an adopted pid we cannot `wait()` on.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for the SIGKILL escalation to be observed.
const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct ManagedProcess {
	spec: ProcessSpec,
	output: OutputCapture,
	/// Exclusive for the whole of start/stop. `None` means no native
	/// process is owned right now.
	lifecycle: Mutex<Option<Handle>>,
	runtime: Arc<RwLock<Runtime>>,
}

enum Handle {
	/// Spawned by us: the monitor task publishes the exit on `exit`.
	Spawned {
		pid: u32,
		exit: watch::Receiver<Option<ExitOutcome>>,
	},
	/// Restored from the store: a bare pid, liveness known only by probing.
	Adopted { pid: u32 },
}

#[derive(Default)]
struct Runtime {
	pid: Option<u32>,
	started_at: Option<Instant>,
	stopped_at: Option<Instant>,
	last_error: Option<String>,
	starting: bool,
}

impl ManagedProcess {
	pub fn new(spec: ProcessSpec) -> Self {
		Self {
			spec,
			output: OutputCapture::new(),
			lifecycle: Mutex::new(None),
			runtime: Arc::new(RwLock::new(Runtime::default())),
		}
	}

	/// Take ownership of a pid restored from the store. The caller is
	/// responsible for having validated its liveness first.
	pub fn adopted(spec: ProcessSpec, pid: u32) -> Self {
		let proc = Self::new(spec);
		{
			let mut rt = proc.runtime.write().unwrap_or_else(|e| e.into_inner());
			rt.pid = Some(pid);
		}
		Self {
			lifecycle: Mutex::new(Some(Handle::Adopted { pid })),
			..proc
		}
	}

	pub fn spec(&self) -> &ProcessSpec {
		&self.spec
	}

	pub fn name(&self) -> &str {
		&self.spec.name
	}

	pub fn pid(&self) -> Option<u32> {
		self.runtime.read().unwrap_or_else(|e| e.into_inner()).pid
	}

	pub fn last_error(&self) -> Option<String> {
		let rt = self.runtime.read().unwrap_or_else(|e| e.into_inner());
		rt.last_error.clone()
	}

	pub async fn output_snapshot(&self) -> Vec<u8> {
		self.output.snapshot().await
	}

	/// Derived status. Read-only, safe while start/stop is in flight on
	/// this entity — the snapshot may be momentarily stale, never torn.
	pub fn state(&self) -> ProcessState {
		let rt = self.runtime.read().unwrap_or_else(|e| e.into_inner());
		if rt.starting {
			return ProcessState::Starting;
		}
		if rt.last_error.is_some() {
			return ProcessState::Failed;
		}
		if let Some(pid) = rt.pid {
			if probe_alive(pid) {
				return ProcessState::Running;
			}
			return ProcessState::Stopped;
		}
		if rt.started_at.is_none() && rt.stopped_at.is_none() {
			return ProcessState::Unknown;
		}
		ProcessState::Stopped
	}

	/// Spawn the process and poll until it is either running, cleanly
	/// exited (a fast zero-exit still counts as started), or failed.
	pub async fn start(&self) -> Result<()> {
		let mut handle = self.lifecycle.lock().await;
		if handle_alive(handle.as_ref()) {
			return Err(ProcessError::AlreadyRunning(self.spec.name.clone()));
		}
		// whatever was here exited long ago
		*handle = None;

		{
			let mut rt = self.runtime.write().unwrap_or_else(|e| e.into_inner());
			rt.starting = true;
			rt.last_error = None;
			rt.stopped_at = None;
		}
		self.output.clear().await;

		debug!(name = %self.spec.name, command = %self.spec.command, "starting process");

		let mut cmd = Command::new(&self.spec.command);
		cmd.args(&self.spec.args)
			.envs(&self.spec.env)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0);
		if let Some(dir) = &self.spec.dir {
			cmd.current_dir(dir);
		}

		let mut child = match cmd.spawn() {
			Ok(c) => c,
			Err(e) => {
				let mut rt = self.runtime.write().unwrap_or_else(|e| e.into_inner());
				rt.starting = false;
				rt.last_error = Some(format!("spawn failed: {}", e));
				return Err(ProcessError::Spawn {
					name: self.spec.name.clone(),
					source: e,
				});
			}
		};

		let pid = child.id().unwrap_or(0);
		{
			let mut rt = self.runtime.write().unwrap_or_else(|e| e.into_inner());
			rt.pid = Some(pid);
			rt.started_at = Some(Instant::now());
		}

		if let Some(stdout) = child.stdout.take() {
			let out = self.output.clone();
			tokio::spawn(async move {
				pipe_output(stdout, out).await;
			});
		}
		if let Some(stderr) = child.stderr.take() {
			let out = self.output.clone();
			tokio::spawn(async move {
				pipe_output(stderr, out).await;
			});
		}

		let (exit_tx, exit_rx) = watch::channel(None);
		let runtime = Arc::clone(&self.runtime);
		let name = self.spec.name.clone();
		tokio::spawn(async move {
			let outcome = match child.wait().await {
				Ok(status) => ExitOutcome::from_status(status),
				Err(e) => {
					error!(name = %name, "wait failed: {}", e);
					ExitOutcome {
						code: None,
						success: false,
					}
				}
			};
			{
				let mut rt = runtime.write().unwrap_or_else(|e| e.into_inner());
				rt.pid = None;
				rt.stopped_at = Some(Instant::now());
				if let Some(code) = outcome.code {
					// a crash after startup is still worth surfacing
					if code != 0 && rt.last_error.is_none() {
						rt.last_error = Some(format!("exited with code {}", code));
					}
				}
			}
			debug!(name = %name, code = ?outcome.code, "process exited");
			let _ = exit_tx.send(Some(outcome));
		});

		let mut poll_rx = exit_rx.clone();
		let readiness = self.poll_ready(pid, &mut poll_rx);
		let result = match tokio::time::timeout(self.spec.start_timeout(), readiness).await {
			Ok(res) => res,
			Err(_) => {
				warn!(name = %self.spec.name, "start timed out, stopping process");
				let mut rx = exit_rx.clone();
				let _ = self.stop_spawned(pid, &mut rx).await;
				Err(ProcessError::StartTimeout(self.spec.name.clone()))
			}
		};

		{
			let mut rt = self.runtime.write().unwrap_or_else(|e| e.into_inner());
			rt.starting = false;
			if let Err(e) = &result {
				rt.last_error = Some(e.to_string());
			}
		}
		if result.is_ok() {
			*handle = Some(Handle::Spawned { pid, exit: exit_rx });
		}
		result
	}

	/// Readiness loop: an observed exit is classified (zero-exit counts as
	/// a successful start), a process still alive after a poll interval is
	/// running. Exit observation is biased over the tick so a fast exit is
	/// never mistaken for liveness; a dead-but-unreaped child keeps
	/// looping until the monitor publishes (or the caller's timeout fires).
	async fn poll_ready(
		&self,
		pid: u32,
		exit: &mut watch::Receiver<Option<ExitOutcome>>,
	) -> Result<()> {
		loop {
			tokio::select! {
				biased;
				changed = exit.changed() => {
					if changed.is_err() {
						// monitor gone without publishing; fall back to probing
						tokio::time::sleep(self.spec.start_delay()).await;
						if probe_alive(pid) {
							return Ok(());
						}
						return Err(ProcessError::StartFailed {
							name: self.spec.name.clone(),
							exit_code: -1,
						});
					}
					let Some(outcome) = *exit.borrow() else {
						continue;
					};
					if outcome.success {
						debug!(name = %self.spec.name, "exited cleanly during startup window");
						return Ok(());
					}
					return Err(ProcessError::StartFailed {
						name: self.spec.name.clone(),
						exit_code: outcome.code.unwrap_or(-1),
					});
				}
				_ = tokio::time::sleep(self.spec.start_delay()) => {
					if probe_alive(pid) {
						debug!(name = %self.spec.name, pid, "process is running");
						return Ok(());
					}
				}
			}
		}
	}

	/// Send the configured stop signal, wait up to `stop_timeout`, then
	/// escalate to SIGKILL. Either way the process is dead on return.
	pub async fn stop(&self) -> Result<()> {
		let mut handle = self.lifecycle.lock().await;
		if !handle_alive(handle.as_ref()) {
			return Err(ProcessError::NotRunning(self.spec.name.clone()));
		}

		let result = match handle.take() {
			Some(Handle::Spawned { pid, mut exit }) => self.stop_spawned(pid, &mut exit).await,
			Some(Handle::Adopted { pid }) => self.stop_adopted(pid).await,
			None => return Err(ProcessError::NotRunning(self.spec.name.clone())),
		};
		if let Err(e) = &result {
			let mut rt = self.runtime.write().unwrap_or_else(|e| e.into_inner());
			rt.last_error = Some(e.to_string());
		}
		result
	}

	/// Stop then Start; a failed Stop means Start is never attempted.
	pub async fn restart(&self) -> Result<()> {
		self.stop().await?;
		self.start().await
	}

	async fn stop_spawned(
		&self,
		pid: u32,
		exit: &mut watch::Receiver<Option<ExitOutcome>>,
	) -> Result<()> {
		self.send_stop_signal(pid);

		match tokio::time::timeout(self.spec.stop_timeout(), exit.changed()).await {
			Ok(_) => {
				self.record_stopped();
				debug!(name = %self.spec.name, "process stopped");
				Ok(())
			}
			Err(_) => {
				warn!(
					name = %self.spec.name,
					timeout_ms = self.spec.stop_timeout_ms,
					"did not exit after stop signal, sending SIGKILL"
				);
				signal_group(pid, Signal::SIGKILL);
				// SIGKILL cannot be ignored; wait for the monitor to reap
				let _ = tokio::time::timeout(KILL_GRACE, exit.changed()).await;
				self.record_stopped();
				Err(ProcessError::StopTimeout(self.spec.name.clone()))
			}
		}
	}

	async fn stop_adopted(&self, pid: u32) -> Result<()> {
		self.send_stop_signal(pid);

		let deadline = Instant::now() + self.spec.stop_timeout();
		while Instant::now() < deadline {
			if !probe_alive(pid) {
				self.record_stopped();
				debug!(name = %self.spec.name, pid, "adopted process stopped");
				return Ok(());
			}
			tokio::time::sleep(PROBE_INTERVAL).await;
		}

		warn!(name = %self.spec.name, pid, "adopted process ignored stop signal, sending SIGKILL");
		signal_group(pid, Signal::SIGKILL);
		let grace = Instant::now() + KILL_GRACE;
		while Instant::now() < grace && probe_alive(pid) {
			tokio::time::sleep(PROBE_INTERVAL).await;
		}
		self.record_stopped();
		Err(ProcessError::StopTimeout(self.spec.name.clone()))
	}

	fn send_stop_signal(&self, pid: u32) {
		// KILL is an unconditional kill, never a soft signal
		let sig = match self.spec.stop_signal {
			StopSignal::Kill => Signal::SIGKILL,
			other => other.signal(),
		};
		debug!(name = %self.spec.name, pid, signal = %sig, "sending stop signal");
		signal_group(pid, sig);
	}

	fn record_stopped(&self) {
		let mut rt = self.runtime.write().unwrap_or_else(|e| e.into_inner());
		rt.pid = None;
		rt.stopped_at = Some(Instant::now());
	}
}

fn handle_alive(handle: Option<&Handle>) -> bool {
	match handle {
		Some(Handle::Spawned { exit, .. }) => exit.borrow().is_none(),
		Some(Handle::Adopted { pid }) => probe_alive(*pid),
		None => false,
	}
}

/// Liveness probe via signal 0.
pub(crate) fn probe_alive(pid: u32) -> bool {
	kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Signal the whole process group (children are spawned as group leaders).
/// A group that already exited is not an error.
fn signal_group(pid: u32, sig: Signal) {
	match killpg(Pid::from_raw(pid as i32), sig) {
		Ok(()) => {}
		Err(Errno::ESRCH) | Err(Errno::EPERM) => {
			debug!(pid, "process group already gone");
		}
		Err(e) => {
			error!(pid, signal = %sig, "failed to signal process group: {}", e);
		}
	}
}

async fn pipe_output<R: tokio::io::AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => output.write(&buf[..n]).await,
			Err(_) => break,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ProcessSpec;

	fn quick_spec(name: &str, command: &str, args: &[&str]) -> ProcessSpec {
		let mut spec = ProcessSpec::new(name, command);
		spec.args = args.iter().map(|s| s.to_string()).collect();
		spec.start_delay_ms = 10;
		spec.start_timeout_ms = 2_000;
		spec.stop_timeout_ms = 2_000;
		spec
	}

	#[test]
	fn never_started_is_unknown() {
		let proc = ManagedProcess::new(ProcessSpec::new("idle", "true"));
		assert_eq!(proc.state(), ProcessState::Unknown);
		assert_eq!(proc.pid(), None);
	}

	#[tokio::test]
	async fn spawn_failure_is_failed_with_no_partial_state() {
		let proc = ManagedProcess::new(quick_spec("ghost", "corral-no-such-binary-xyz", &[]));
		let err = proc.start().await.unwrap_err();
		assert!(matches!(err, ProcessError::Spawn { .. }));
		assert_eq!(proc.state(), ProcessState::Failed);
		assert_eq!(proc.pid(), None);
	}

	#[tokio::test]
	async fn fast_clean_exit_is_a_successful_start() {
		let proc = ManagedProcess::new(quick_spec("oneshot", "sleep", &["0"]));
		let started = Instant::now();
		proc.start().await.expect("zero-exit start succeeds");
		assert!(started.elapsed() < Duration::from_millis(500));
		assert_eq!(proc.state(), ProcessState::Stopped);
	}

	#[tokio::test]
	async fn nonzero_exit_is_start_failed() {
		let proc = ManagedProcess::new(quick_spec("broken", "sh", &["-c", "exit 3"]));
		let err = proc.start().await.unwrap_err();
		assert!(matches!(
			err,
			ProcessError::StartFailed { exit_code: 3, .. }
		));
		assert_eq!(proc.state(), ProcessState::Failed);
	}

	#[tokio::test]
	async fn stop_when_not_running_never_mutates() {
		let proc = ManagedProcess::new(quick_spec("idle", "sleep", &["60"]));
		let err = proc.stop().await.unwrap_err();
		assert!(matches!(err, ProcessError::NotRunning(_)));
		assert_eq!(proc.state(), ProcessState::Unknown);
	}

	#[tokio::test]
	async fn adopted_dead_pid_reports_stopped() {
		// reap a child ourselves so the pid is guaranteed stale
		let mut child = std::process::Command::new("true")
			.spawn()
			.expect("spawn true");
		let pid = child.id();
		child.wait().expect("wait");

		let proc = ManagedProcess::adopted(quick_spec("stale", "true", &[]), pid);
		assert_eq!(proc.state(), ProcessState::Stopped);
		let err = proc.stop().await.unwrap_err();
		assert!(matches!(err, ProcessError::NotRunning(_)));
	}

	#[tokio::test]
	async fn captures_combined_output() {
		let proc = ManagedProcess::new(quick_spec(
			"noisy",
			"sh",
			&["-c", "echo out-line; echo err-line >&2"],
		));
		proc.start().await.expect("start");
		tokio::time::sleep(Duration::from_millis(200)).await;

		let text = String::from_utf8_lossy(&proc.output_snapshot().await).to_string();
		assert!(text.contains("out-line"), "output was: {}", text);
		assert!(text.contains("err-line"), "output was: {}", text);
	}
}
