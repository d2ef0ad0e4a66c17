use std::sync::Arc;
use std::time::{Duration, Instant};

use corral::store::{MemoryStore, ProcessStore};
use corral::{ManagedProcess, ProcessError, ProcessSpec, ProcessState, StopSignal, Supervisor};

fn spec(name: &str, command: &str, args: &[&str]) -> ProcessSpec {
	let mut spec = ProcessSpec::new(name, command);
	spec.args = args.iter().map(|s| s.to_string()).collect();
	spec.start_delay_ms = 10;
	spec.start_timeout_ms = 1_000;
	spec.stop_timeout_ms = 2_000;
	spec
}

fn sleeper(name: &str) -> ProcessSpec {
	spec(name, "sleep", &["60"])
}

// --- ManagedProcess lifecycle ---

#[tokio::test]
async fn fast_clean_exit_starts_within_the_poll_window() {
	let proc = ManagedProcess::new(spec("oneshot", "sleep", &["0"]));

	let started = Instant::now();
	proc.start().await.expect("fast zero-exit is a start success");
	// one ~10ms poll tick plus scheduling slack
	assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn start_while_running_is_rejected_without_double_spawn() {
	let proc = ManagedProcess::new(sleeper("dup"));
	proc.start().await.expect("first start");
	let pid = proc.pid().expect("running pid");

	let err = proc.start().await.unwrap_err();
	assert!(matches!(err, ProcessError::AlreadyRunning(_)));
	// the original process instance is untouched
	assert_eq!(proc.pid(), Some(pid));
	assert_eq!(proc.state(), ProcessState::Running);

	proc.stop().await.expect("stop");
}

#[tokio::test]
async fn stop_kills_and_second_stop_is_not_running() {
	let proc = ManagedProcess::new(sleeper("stopper"));
	proc.start().await.expect("start");
	let pid = proc.pid().expect("running pid");

	proc.stop().await.expect("stop");
	assert!(!alive(pid));

	// idempotent-safe: immediately fails, never hangs
	let err = proc.stop().await.unwrap_err();
	assert!(matches!(err, ProcessError::NotRunning(_)));
}

#[tokio::test]
async fn term_ignoring_process_is_force_killed_after_stop_timeout() {
	// the loop keeps the shell alive even though killpg terminates each
	// inner sleep; only the shell itself ignores TERM
	let mut s = spec(
		"stubborn",
		"sh",
		&["-c", r#"trap "" TERM; while true; do sleep 1; done"#],
	);
	s.stop_signal = StopSignal::Term;
	s.stop_timeout_ms = 200;
	let proc = ManagedProcess::new(s);

	proc.start().await.expect("start");
	// let the shell install its trap before signalling
	tokio::time::sleep(Duration::from_millis(100)).await;
	let pid = proc.pid().expect("running pid");

	let waited = Instant::now();
	let err = proc.stop().await.unwrap_err();
	assert!(matches!(err, ProcessError::StopTimeout(_)));
	assert!(waited.elapsed() >= Duration::from_millis(200));
	// force-killed: dead despite the error
	assert!(!alive(pid));
	assert_ne!(proc.state(), ProcessState::Running);
}

#[tokio::test]
async fn kill_stop_signal_is_unconditional() {
	let mut s = sleeper("hard");
	s.stop_signal = StopSignal::Kill;
	let proc = ManagedProcess::new(s);

	proc.start().await.expect("start");
	let pid = proc.pid().expect("running pid");
	proc.stop().await.expect("SIGKILL stop succeeds");
	assert!(!alive(pid));
}

#[tokio::test]
async fn restart_surfaces_stop_error_without_starting() {
	let proc = ManagedProcess::new(sleeper("nostart"));
	// never started: stop must fail, and start must not be attempted
	let err = proc.restart().await.unwrap_err();
	assert!(matches!(err, ProcessError::NotRunning(_)));
	assert_eq!(proc.pid(), None);
}

#[tokio::test]
async fn restart_replaces_the_native_process() {
	let proc = ManagedProcess::new(sleeper("phoenix"));
	proc.start().await.expect("start");
	let first_pid = proc.pid().expect("pid");

	proc.restart().await.expect("restart");
	let second_pid = proc.pid().expect("pid after restart");
	assert_ne!(first_pid, second_pid);
	assert!(!alive(first_pid));

	proc.stop().await.expect("stop");
}

// --- Supervisor registry ---

#[tokio::test]
async fn duplicate_add_keeps_the_first() {
	let sup = Supervisor::new();
	sup.add_process(sleeper("web")).await.expect("first add");

	let err = sup.add_process(spec("web", "echo", &[])).await.unwrap_err();
	assert!(matches!(err, ProcessError::DuplicateName(_)));

	let list = sup.list_processes().await;
	assert_eq!(list.len(), 1);
	assert_eq!(list[0].name, "web");
}

#[tokio::test]
async fn add_list_remove_restores_the_key_set() {
	let sup = Supervisor::new();
	sup.add_process(sleeper("keep")).await.expect("add keep");
	let before: Vec<String> = sup.list_processes().await.into_iter().map(|s| s.name).collect();

	sup.add_process(sleeper("transient")).await.expect("add");
	sup.remove_process("transient").await.expect("remove");

	let after: Vec<String> = sup.list_processes().await.into_iter().map(|s| s.name).collect();
	assert_eq!(before, after);
}

#[tokio::test]
async fn autostart_failure_is_surfaced_but_entity_stays_registered() {
	let sup = Supervisor::new();
	let mut s = spec("broken", "sh", &["-c", "exit 1"]);
	s.autostart = true;

	let err = sup.add_process(s).await.unwrap_err();
	assert!(matches!(err, ProcessError::StartFailed { .. }));

	// operators can retry a start later
	assert_eq!(sup.list_processes().await.len(), 1);
	assert_eq!(sup.status("broken").await.unwrap(), ProcessState::Failed);
}

#[tokio::test]
async fn operations_on_distinct_processes_run_in_parallel() {
	let sup = Arc::new(Supervisor::new());
	sup.add_process(sleeper("a")).await.expect("add a");
	sup.add_process(sleeper("b")).await.expect("add b");
	sup.start_process("b").await.expect("start b");

	// concurrent Start(a) + Stop(b) must not deadlock; bound the whole
	// thing so a deadlock fails the test instead of hanging it
	let sup_a = Arc::clone(&sup);
	let sup_b = Arc::clone(&sup);
	let both = async {
		tokio::join!(
			async move { sup_a.start_process("a").await },
			async move { sup_b.stop_process("b").await },
		)
	};
	let (ra, rb) = tokio::time::timeout(Duration::from_secs(5), both)
		.await
		.expect("no deadlock between distinct processes");
	ra.expect("start a");
	rb.expect("stop b");

	sup.stop_process("a").await.expect("stop a");
}

#[tokio::test]
async fn run_stops_everything_on_shutdown() {
	let sup = Supervisor::new();
	let mut a = sleeper("a");
	a.autostart = true;
	let mut b = sleeper("b");
	b.autostart = true;
	sup.add_process(a).await.expect("add a");
	sup.add_process(b).await.expect("add b");

	let (tx, rx) = tokio::sync::oneshot::channel::<()>();
	let trigger = tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(300)).await;
		let _ = tx.send(());
	});

	sup.run(async {
		let _ = rx.await;
	})
	.await
	.expect("clean shutdown");
	trigger.await.unwrap();

	for snap in sup.list_processes().await {
		assert!(!snap.state.is_running(), "{} still running", snap.name);
	}
}

// --- Persistence / restore ---

#[tokio::test]
async fn restore_adopts_live_pids_and_prunes_stale_rows() {
	let store = Arc::new(MemoryStore::new());

	// a supervisor starts a process and persists its record
	let first = Supervisor::with_store(Arc::clone(&store) as Arc<dyn ProcessStore>);
	first.add_process(sleeper("survivor")).await.expect("add");
	first.start_process("survivor").await.expect("start");
	let pid = first
		.list_processes()
		.await
		.into_iter()
		.find(|s| s.name == "survivor")
		.and_then(|s| s.pid)
		.expect("running pid");

	// plus a record whose pid is long dead
	store
		.insert(&corral::ProcessRecord {
			name: "ghost".into(),
			path: "/bin/sleep".into(),
			pid: reaped_pid(),
		})
		.expect("insert stale");

	// a fresh supervisor over the same store re-validates everything
	let second = Supervisor::with_store(Arc::clone(&store) as Arc<dyn ProcessStore>);
	let adopted = second.restore().await.expect("restore");
	assert_eq!(adopted, 1);

	let list = second.list_processes().await;
	assert_eq!(list.len(), 1);
	assert_eq!(list[0].name, "survivor");
	assert_eq!(list[0].pid, Some(pid));
	assert_eq!(list[0].state, ProcessState::Running);

	// stale row was pruned
	assert!(store.list().unwrap().iter().all(|r| r.name != "ghost"));

	// the adopted process can be stopped through the new supervisor
	second.stop_process("survivor").await.expect("stop adopted");
	assert!(!alive(pid));
}

#[tokio::test]
async fn remove_drops_the_store_record() {
	let store = Arc::new(MemoryStore::new());
	let sup = Supervisor::with_store(Arc::clone(&store) as Arc<dyn ProcessStore>);

	sup.add_process(sleeper("tracked")).await.expect("add");
	sup.start_process("tracked").await.expect("start");
	assert_eq!(store.list().unwrap().len(), 1);

	sup.remove_process("tracked").await.expect("remove");
	assert!(store.list().unwrap().is_empty());
}

// --- helpers ---

fn alive(pid: u32) -> bool {
	nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Pid of a child we spawned and reaped ourselves, guaranteed stale.
fn reaped_pid() -> u32 {
	let mut child = std::process::Command::new("true").spawn().expect("spawn");
	let pid = child.id();
	child.wait().expect("wait");
	pid
}
