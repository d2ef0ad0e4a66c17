//! TOML config: global knobs plus `[processes.<name>]` tables.
//!
//! ```toml
//! log_level = "debug"
//!
//! [processes.web]
//! command = "python3"
//! args = ["-m", "http.server"]
//! autostart = true
//! restart_policy = "on-failure"
//! stop_signal = "term"
//! stop_timeout_ms = 3000
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use corral::{ProcessSpec, RestartPolicy, StopSignal};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default)]
	pub processes: BTreeMap<String, ProcessEntry>,
}

fn default_log_level() -> String {
	"info".into()
}

impl Default for Config {
	fn default() -> Self {
		Self {
			log_level: default_log_level(),
			processes: BTreeMap::new(),
		}
	}
}

/// One process table. Mirrors `ProcessSpec` minus the name (the table key).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessEntry {
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
	pub start_retries: Option<u32>,
	pub start_delay_ms: Option<u64>,
	pub start_timeout_ms: Option<u64>,
	#[serde(default)]
	pub stop_signal: StopSignal,
	pub stop_timeout_ms: Option<u64>,
}

impl ProcessEntry {
	pub fn into_spec(self, name: &str) -> ProcessSpec {
		let mut spec = ProcessSpec::new(name, self.command);
		spec.args = self.args;
		spec.dir = self.dir;
		spec.env = self.env;
		spec.autostart = self.autostart;
		spec.restart_policy = self.restart_policy;
		spec.stop_signal = self.stop_signal;
		if let Some(v) = self.start_retries {
			spec.start_retries = v;
		}
		if let Some(v) = self.start_delay_ms {
			spec.start_delay_ms = v;
		}
		if let Some(v) = self.start_timeout_ms {
			spec.start_timeout_ms = v;
		}
		if let Some(v) = self.stop_timeout_ms {
			spec.stop_timeout_ms = v;
		}
		spec
	}
}

impl Config {
	pub fn specs(self) -> Vec<ProcessSpec> {
		self.processes
			.into_iter()
			.map(|(name, entry)| entry.into_spec(&name))
			.collect()
	}
}

/// A missing file is an empty config; a malformed one is reported.
pub fn load(path: &Path) -> Result<Config, String> {
	if !path.exists() {
		return Ok(Config::default());
	}
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}
