pub mod collector;
pub mod json;
pub mod mask;
pub mod report;
pub mod text;
pub mod traits;

pub use collector::{ResultCollector, Summary};
pub use json::JsonFormatter;
pub use mask::{MASKED_TARGET, mask};
pub use report::{Report, ReportEntry};
pub use text::TextFormatter;
pub use traits::{OutputError, ReportFormatter};
