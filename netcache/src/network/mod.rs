//! Network orchestration
//!
//! [`RequestScheduler`] is the caller-facing entry point. It owns an
//! [`AdmissionController`] for per-host and global concurrency, a
//! [`RetryCoordinator`] for timeouts and backoff, and uses the adaptive cache
//! for response caching. [`BatchCoordinator`] paces groups of submissions.

pub mod batch;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use batch::BatchCoordinator;
pub use pool::{AdmissionController, ConnectionPermit, ConnectionPool};
pub use retry::{RetryCoordinator, RetryOutcome, RetryPolicy};
pub use scheduler::{RequestScheduler, SchedulerConfig};
pub use transport::{
    HttpTransport, SharedTransport, StatusClass, StatusClassifier, Transport,
    default_classifier, default_status_class,
};
pub use types::{
    CachedResponse, HttpMethod, NetworkRequest, NetworkResponse, Priority, SchedulerStats,
    TransportResponse,
};
