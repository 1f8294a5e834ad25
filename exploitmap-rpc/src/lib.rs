pub mod client;
pub mod console;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod traits;

pub use client::MsfRpcClient;
pub use console::ConsoleLease;
pub use error::RpcError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockOutcome, MockService};
pub use traits::{ExecuteResponse, ExploitService, ModuleHandle, ModuleInfo, SessionInfo};
