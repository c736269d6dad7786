//! MaxIOFS S3 API support
//!
//! The S3 XML wire types, the AWS error envelope, and the Prometheus
//! metrics registry shared by both listeners.

pub mod error;
pub mod metrics;
pub mod xml;

pub use error::{error_response, s3_error_response};
pub use metrics::{s3_metrics, OperationTimer, S3Metrics, S3Operation};
