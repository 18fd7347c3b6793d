// Structured logging
pub mod logging;

pub use logging::{init_logging, redact_headers};
