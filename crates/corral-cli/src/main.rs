mod config;
mod paths;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use corral::{JsonFileStore, ProcessError, ProcessState, Supervisor};
use owo_colors::OwoColorize;

#[derive(Parser)]
#[command(name = "corral", version, about = "Minimal process supervisor")]
struct Cli {
	/// Config file (default: ~/.config/corral/corral.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Run the supervisor in the foreground until SIGINT/SIGTERM
	Run,
	/// Register a process
	Add {
		name: String,
		command: String,
		/// Arguments passed to the command
		#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
		args: Vec<String>,
		/// Start it as part of the add
		#[arg(long)]
		autostart: bool,
	},
	/// Stop (if needed) and unregister a process
	Remove { name: String },
	/// Start a registered process
	Start { name: String },
	/// Stop a running process
	Stop { name: String },
	/// Stop then start a process
	Restart { name: String },
	/// Show the status of a process
	Status { name: String },
	/// List all registered processes
	List,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let config_path = cli.config.unwrap_or_else(paths::default_config_path);
	let config = match config::load(&config_path) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(2);
		}
	};
	init_tracing(&config.log_level);

	let result = match cli.command {
		Command::Run => cmd_run(config).await,
		Command::Add {
			name,
			command,
			args,
			autostart,
		} => cmd_add(config, name, command, args, autostart).await,
		Command::Remove { name } => cmd_remove(config, name).await,
		Command::Start { name } => cmd_start(config, name).await,
		Command::Stop { name } => cmd_stop(config, name).await,
		Command::Restart { name } => cmd_restart(config, name).await,
		Command::Status { name } => cmd_status(config, name).await,
		Command::List => cmd_list(config).await,
	};

	if let Err(e) = result {
		eprintln!("{} {}", "error:".red().bold(), e);
		std::process::exit(1);
	}
}

fn init_tracing(level: &str) {
	let level = tracing::Level::from_str(level).unwrap_or(tracing::Level::INFO);
	tracing_subscriber::fmt().with_max_level(level).init();
}

/// Store-backed supervisor with live pids re-adopted and all config
/// processes registered (without starting any of them).
async fn registered_supervisor(config: config::Config) -> Result<Supervisor, ProcessError> {
	let store = Arc::new(JsonFileStore::new(paths::store_path()));
	let sup = Supervisor::with_store(store);
	sup.restore().await?;

	for mut spec in config.specs() {
		spec.autostart = false;
		match sup.add_process(spec).await {
			Ok(()) => {}
			// already adopted from the store
			Err(ProcessError::DuplicateName(_)) => {}
			Err(e) => return Err(e),
		}
	}
	Ok(sup)
}

async fn cmd_run(config: config::Config) -> Result<(), ProcessError> {
	let store = Arc::new(JsonFileStore::new(paths::store_path()));
	let sup = Supervisor::with_store(store);
	let adopted = sup.restore().await?;
	if adopted > 0 {
		tracing::info!(adopted, "re-adopted processes from previous run");
	}

	for spec in config.specs() {
		let name = spec.name.clone();
		match sup.add_process(spec).await {
			Ok(()) => {}
			Err(ProcessError::DuplicateName(_)) => {
				tracing::debug!(name, "already registered from store");
			}
			// failed autostarts stay registered; run() retries them
			Err(e) => tracing::warn!(name, "autostart failed: {}", e),
		}
	}

	sup.run(shutdown_signal()).await
}

async fn cmd_add(
	config: config::Config,
	name: String,
	command: String,
	args: Vec<String>,
	autostart: bool,
) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;

	let mut spec = corral::ProcessSpec::new(&name, command);
	spec.args = args;
	spec.autostart = autostart;
	sup.add_process(spec).await?;

	let pid = sup.get(&name).await?.pid();
	println!("added '{}'{}", name, pid_suffix(pid));
	Ok(())
}

async fn cmd_remove(config: config::Config, name: String) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;
	sup.remove_process(&name).await?;
	println!("removed '{}'", name);
	Ok(())
}

async fn cmd_start(config: config::Config, name: String) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;
	sup.start_process(&name).await?;
	let pid = sup.get(&name).await?.pid();
	println!("started '{}'{}", name, pid_suffix(pid));
	Ok(())
}

async fn cmd_stop(config: config::Config, name: String) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;
	sup.stop_process(&name).await?;
	println!("stopped '{}'", name);
	Ok(())
}

async fn cmd_restart(config: config::Config, name: String) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;
	sup.restart_process(&name).await?;
	let pid = sup.get(&name).await?.pid();
	println!("restarted '{}'{}", name, pid_suffix(pid));
	Ok(())
}

async fn cmd_status(config: config::Config, name: String) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;
	let proc = sup.get(&name).await?;
	println!(
		"{}{}: {}",
		name.bold(),
		pid_suffix(proc.pid()),
		paint_state(proc.state())
	);
	if let Some(err) = proc.last_error() {
		println!("  last error: {}", err.red());
	}
	Ok(())
}

async fn cmd_list(config: config::Config) -> Result<(), ProcessError> {
	let sup = registered_supervisor(config).await?;
	let snapshots = sup.list_processes().await;
	if snapshots.is_empty() {
		println!("no processes registered");
		return Ok(());
	}

	for snap in snapshots {
		let pid = snap
			.pid
			.map(|p| p.to_string())
			.unwrap_or_else(|| "-".into());
		println!(
			"{:<20} {:>8}  {}",
			snap.name.bold(),
			pid,
			paint_state(snap.state)
		);
	}
	Ok(())
}

fn paint_state(state: ProcessState) -> String {
	match state {
		ProcessState::Running => format!("{}", "running".green()),
		ProcessState::Starting => format!("{}", "starting".yellow()),
		ProcessState::Failed => format!("{}", "failed".red()),
		ProcessState::Stopped => format!("{}", "stopped".dimmed()),
		ProcessState::Unknown => format!("{}", "unknown".dimmed()),
	}
}

fn pid_suffix(pid: Option<u32>) -> String {
	pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
}

/// Resolves when the OS asks us to shut down. This is the only place real
/// signals are wired in; the supervisor itself just takes a future.
async fn shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
		(Ok(mut term), Ok(mut int)) => {
			tokio::select! {
				_ = term.recv() => tracing::info!("received SIGTERM"),
				_ = int.recv() => tracing::info!("received SIGINT"),
			}
		}
		_ => {
			let _ = tokio::signal::ctrl_c().await;
		}
	}
}
