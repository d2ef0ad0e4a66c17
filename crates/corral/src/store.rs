//! Persistence of process records across supervisor runs.
//!
//! The supervisor only needs three operations: list everything, insert a
//! record, remove by pid. A restored pid is never trusted until its
//! liveness is re-checked (see `Supervisor::restore`).

use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::types::ProcessRecord;

pub trait ProcessStore: Send + Sync {
	fn list(&self) -> Result<Vec<ProcessRecord>, StoreError>;
	fn insert(&self, record: &ProcessRecord) -> Result<(), StoreError>;
	fn remove(&self, pid: u32) -> Result<(), StoreError>;
}

/// File-backed store: a JSON array of records, rewritten whole on every
/// mutation. Small enough that atomicity via rename is not worth the churn.
pub struct JsonFileStore {
	path: PathBuf,
	// serializes read-modify-write cycles between tasks sharing this store
	guard: Mutex<()>,
}

impl JsonFileStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			guard: Mutex::new(()),
		}
	}

	fn read_all(&self) -> Result<Vec<ProcessRecord>, StoreError> {
		match std::fs::read_to_string(&self.path) {
			Ok(data) if data.trim().is_empty() => Ok(Vec::new()),
			Ok(data) => Ok(serde_json::from_str(&data)?),
			// first run: no file yet
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(e.into()),
		}
	}

	fn write_all(&self, records: &[ProcessRecord]) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let data = serde_json::to_string_pretty(records)?;
		std::fs::write(&self.path, data)?;
		Ok(())
	}
}

impl ProcessStore for JsonFileStore {
	fn list(&self) -> Result<Vec<ProcessRecord>, StoreError> {
		let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
		self.read_all()
	}

	fn insert(&self, record: &ProcessRecord) -> Result<(), StoreError> {
		let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
		let mut records = self.read_all()?;
		records.push(record.clone());
		self.write_all(&records)
	}

	fn remove(&self, pid: u32) -> Result<(), StoreError> {
		let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
		let mut records = self.read_all()?;
		records.retain(|r| r.pid != pid);
		self.write_all(&records)
	}
}

/// In-memory store, for tests and for running without persistence.
#[derive(Default)]
pub struct MemoryStore {
	records: Mutex<Vec<ProcessRecord>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl ProcessStore for MemoryStore {
	fn list(&self) -> Result<Vec<ProcessRecord>, StoreError> {
		let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
		Ok(records.clone())
	}

	fn insert(&self, record: &ProcessRecord) -> Result<(), StoreError> {
		let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
		records.push(record.clone());
		Ok(())
	}

	fn remove(&self, pid: u32) -> Result<(), StoreError> {
		let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
		records.retain(|r| r.pid != pid);
		Ok(())
	}
}
