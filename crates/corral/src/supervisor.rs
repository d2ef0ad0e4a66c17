//! The registry owning a collection of managed processes.
//!
//! The supervisor's lock guards only the name→process mapping. Lookups
//! clone the `Arc` and release the guard before invoking any blocking
//! lifecycle call, so stopping one process never blocks starting another.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ProcessError, Result};
use crate::policy::{self, RestartDecision};
use crate::process::{probe_alive, ManagedProcess};
use crate::store::ProcessStore;
use crate::types::{ExitOutcome, ProcessRecord, ProcessSnapshot, ProcessSpec, ProcessState};

pub struct Supervisor {
	registry: RwLock<HashMap<String, Arc<ManagedProcess>>>,
	store: Option<Arc<dyn ProcessStore>>,
}

impl Supervisor {
	pub fn new() -> Self {
		Self {
			registry: RwLock::new(HashMap::new()),
			store: None,
		}
	}

	pub fn with_store(store: Arc<dyn ProcessStore>) -> Self {
		Self {
			registry: RwLock::new(HashMap::new()),
			store: Some(store),
		}
	}

	/// Rehydrate previously known processes from the store. Every restored
	/// pid is re-validated: live ones are adopted, stale rows are pruned.
	pub async fn restore(&self) -> Result<usize> {
		let Some(store) = &self.store else {
			return Ok(0);
		};

		let mut adopted = 0;
		for record in store.list().map_err(ProcessError::Store)? {
			if !probe_alive(record.pid) {
				debug!(name = %record.name, pid = record.pid, "pruning stale record");
				let _ = store.remove(record.pid);
				continue;
			}

			// only the executable path survives in the store
			let spec = ProcessSpec::new(record.name.clone(), record.path.clone());
			let proc = Arc::new(ManagedProcess::adopted(spec, record.pid));
			let mut registry = self.registry.write().await;
			if registry.contains_key(&record.name) {
				warn!(name = %record.name, "duplicate record in store, skipping");
				continue;
			}
			info!(name = %record.name, pid = record.pid, "adopted running process");
			registry.insert(record.name.clone(), proc);
			adopted += 1;
		}
		Ok(adopted)
	}

	/// Register a process. With `autostart` set the first start happens
	/// synchronously here; a failed autostart is the add's error, but the
	/// entity stays registered so the start can be retried.
	pub async fn add_process(&self, spec: ProcessSpec) -> Result<()> {
		let name = spec.name.clone();
		let autostart = spec.autostart;
		let proc = Arc::new(ManagedProcess::new(spec));

		{
			let mut registry = self.registry.write().await;
			if registry.contains_key(&name) {
				return Err(ProcessError::DuplicateName(name));
			}
			registry.insert(name.clone(), Arc::clone(&proc));
		}
		self.persist(&proc, None);

		if autostart {
			let old_pid = proc.pid();
			proc.start().await?;
			self.persist(&proc, old_pid);
		}
		Ok(())
	}

	/// Drop a process from the registry, stopping it first if alive.
	/// A failed stop is logged, not fatal — removal always completes.
	pub async fn remove_process(&self, name: &str) -> Result<()> {
		let proc = self.lookup(name).await?;

		let pid = proc.pid();
		if proc.state().is_running() {
			if let Err(e) = proc.stop().await {
				warn!(name, "stop during removal failed: {}", e);
			}
		}

		self.registry.write().await.remove(name);
		if let (Some(store), Some(pid)) = (&self.store, pid) {
			if let Err(e) = store.remove(pid) {
				warn!(name, pid, "failed to drop store record: {}", e);
			}
		}
		info!(name, "removed process");
		Ok(())
	}

	pub async fn start_process(&self, name: &str) -> Result<()> {
		let proc = self.lookup(name).await?;
		let old_pid = proc.pid();
		proc.start().await?;
		self.persist(&proc, old_pid);
		Ok(())
	}

	pub async fn stop_process(&self, name: &str) -> Result<()> {
		let proc = self.lookup(name).await?;
		proc.stop().await
	}

	pub async fn restart_process(&self, name: &str) -> Result<()> {
		let proc = self.lookup(name).await?;
		let old_pid = proc.pid();
		proc.restart().await?;
		self.persist(&proc, old_pid);
		Ok(())
	}

	pub async fn status(&self, name: &str) -> Result<ProcessState> {
		Ok(self.lookup(name).await?.state())
	}

	pub async fn get(&self, name: &str) -> Result<Arc<ManagedProcess>> {
		self.lookup(name).await
	}

	/// Point-in-time copy of the registry, sorted by name.
	pub async fn list_processes(&self) -> Vec<ProcessSnapshot> {
		let registry = self.registry.read().await;
		let mut snapshots: Vec<ProcessSnapshot> = registry
			.values()
			.map(|p| ProcessSnapshot {
				name: p.name().to_string(),
				pid: p.pid(),
				state: p.state(),
			})
			.collect();
		snapshots.sort_by(|a, b| a.name.cmp(&b.name));
		snapshots
	}

	/// Start every autostart process. Failures never abort siblings; each
	/// is logged together with its restart eligibility.
	pub async fn start_all(&self) -> Vec<ProcessError> {
		let procs = self.snapshot_procs().await;
		let mut errors = Vec::new();

		for proc in procs {
			if !proc.spec().autostart || proc.state().is_running() {
				continue;
			}
			if let Err(e) = proc.start().await {
				let exit = match &e {
					ProcessError::StartFailed { exit_code, .. } => ExitOutcome {
						code: Some(*exit_code),
						success: false,
					},
					_ => ExitOutcome {
						code: None,
						success: false,
					},
				};
				let decision = policy::evaluate(proc.spec().restart_policy, exit);
				warn!(
					name = proc.name(),
					retry_eligible = decision == RestartDecision::Retry,
					"autostart failed: {}",
					e
				);
				errors.push(e);
			} else {
				self.persist(&proc, None);
			}
		}
		errors
	}

	/// Stop every running process, collecting errors rather than stopping
	/// at the first. All processes get a stop attempt.
	pub async fn stop_all(&self) -> Result<()> {
		let procs = self.snapshot_procs().await;
		let mut errors = Vec::new();

		for proc in procs {
			if !proc.state().is_running() {
				continue;
			}
			if let Err(e) = proc.stop().await {
				warn!(name = proc.name(), "stop failed: {}", e);
				errors.push(e);
			}
		}

		if errors.is_empty() {
			Ok(())
		} else {
			Err(ProcessError::Shutdown(errors))
		}
	}

	/// Top-level loop: start all autostart processes, block until the
	/// shutdown future resolves, then stop everything. The caller wires OS
	/// signals into `shutdown` at the process boundary; tests pass any
	/// future they like.
	pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
		let errors = self.start_all().await;
		if !errors.is_empty() {
			warn!("{} process(es) failed to autostart", errors.len());
		}
		info!("supervisor running, waiting for shutdown");

		shutdown.await;

		info!("shutdown requested, stopping all processes");
		self.stop_all().await
	}

	async fn lookup(&self, name: &str) -> Result<Arc<ManagedProcess>> {
		let registry = self.registry.read().await;
		registry
			.get(name)
			.cloned()
			.ok_or_else(|| ProcessError::NotFound(name.to_string()))
	}

	async fn snapshot_procs(&self) -> Vec<Arc<ManagedProcess>> {
		self.registry.read().await.values().cloned().collect()
	}

	/// Rewrite the store row after a pid change: drop the old pid's row,
	/// insert the current one. Best-effort; store failures are logged.
	fn persist(&self, proc: &Arc<ManagedProcess>, old_pid: Option<u32>) {
		let Some(store) = &self.store else {
			return;
		};
		if let Some(old) = old_pid {
			if let Err(e) = store.remove(old) {
				warn!(name = proc.name(), "failed to drop old store record: {}", e);
			}
		}
		if let Some(pid) = proc.pid() {
			let record = ProcessRecord {
				name: proc.name().to_string(),
				path: proc.spec().command.clone(),
				pid,
			};
			if let Err(e) = store.insert(&record) {
				warn!(name = proc.name(), pid, "failed to persist record: {}", e);
			}
		}
	}
}

impl Default for Supervisor {
	fn default() -> Self {
		Self::new()
	}
}
