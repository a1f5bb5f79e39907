//! baghouse Observability
//!
//! Prometheus metrics for the bag reader stack.
//!
//! # Usage
//!
//! ```no_run
//! use baghouse_observability::{exporter, metrics};
//!
//! // Initialize metrics
//! metrics::init();
//!
//! // Dump everything in text format
//! let text = exporter::encode_text().unwrap();
//! println!("{}", text);
//! ```

pub mod exporter;
pub mod metrics;

// Re-export commonly used items
pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_does_not_panic() {
        init();
    }

    #[test]
    fn test_double_init_is_safe() {
        init();
        init_metrics();
        let _registry = &*REGISTRY;
    }
}
