// Observability: logging, metrics, and run summaries pushed to a gateway

pub mod logging;
pub mod metrics;
pub mod metrics_push;

// Re-export main functions for ease of use
pub use logging::init_logging;
pub use metrics::{init, render};
