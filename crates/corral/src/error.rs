use thiserror::Error;

/// Errors from storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("corrupt store data: {0}")]
	Corrupt(#[from] serde_json::Error),
}

/// Errors from lifecycle operations on managed processes.
#[derive(Debug, Error)]
pub enum ProcessError {
	#[error("process '{0}' already running")]
	AlreadyRunning(String),

	#[error("process '{0}' not running")]
	NotRunning(String),

	#[error("process '{0}' not found")]
	NotFound(String),

	#[error("process '{0}' already exists")]
	DuplicateName(String),

	#[error("failed to spawn process '{name}': {source}")]
	Spawn {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("timeout waiting for process '{0}' to start")]
	StartTimeout(String),

	#[error("process '{name}' exited with code {exit_code} during startup")]
	StartFailed { name: String, exit_code: i32 },

	/// The process ignored its stop signal and was force-killed. It is
	/// guaranteed dead when this is returned.
	#[error("timeout waiting for process '{0}' to stop, sent SIGKILL")]
	StopTimeout(String),

	#[error("store error: {0}")]
	Store(#[from] StoreError),

	#[error("{} process(es) failed to stop during shutdown", .0.len())]
	Shutdown(Vec<ProcessError>),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
