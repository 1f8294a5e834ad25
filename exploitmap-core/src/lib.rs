pub mod context;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod sessions;
pub mod watch;

pub use context::{Clock, EngineContext, SystemClock};
pub use error::{AttemptError, EngineError};
pub use pipeline::{Orchestrator, RunOutcome, build_configuration};
pub use scheduler::{ExecutionScheduler, console_reports_success, select_payload};
pub use sessions::{SessionTracker, SweepReport};
pub use tokio_util::sync::CancellationToken;
pub use watch::{PollingWatch, SessionWatch, WatchRequest};
