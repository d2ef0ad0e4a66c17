//! # corral
//!
//! Minimal process supervisor: launch, track, and stop child processes.
//!
//! A [`Supervisor`] owns a registry of named [`ManagedProcess`]es, each a
//! small lifecycle state machine (spawn, poll until ready, stop with
//! timeout-bounded signal escalation). Known processes can be persisted
//! through a [`store::ProcessStore`] and re-adopted on the next run.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use corral::{ProcessSpec, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), corral::ProcessError> {
//! let sup = Supervisor::new();
//!
//! let mut web = ProcessSpec::new("web", "python3");
//! web.args = vec!["-m".into(), "http.server".into()];
//! web.autostart = true;
//! sup.add_process(web).await?;
//!
//! // blocks until the shutdown future resolves, then stops everything
//! sup.run(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod output;
pub mod policy;
pub mod process;
pub mod store;
pub mod supervisor;
pub mod types;

pub use error::{ProcessError, Result, StoreError};
pub use output::OutputCapture;
pub use process::ManagedProcess;
pub use store::{JsonFileStore, MemoryStore, ProcessStore};
pub use supervisor::Supervisor;
pub use types::*;
