//! Retry Coordinator
//!
//! Runs one logical request as a sequence of attempts. Each attempt first
//! waits for admission, then is bounded by the request timeout. Retryable
//! failures back off linearly (`base_delay * (retry + 1)`) before re-entering
//! admission; the final failure is returned once retries are exhausted.

use super::transport::{SharedTransport, StatusClass, StatusClassifier};
use super::types::{NetworkRequest, TransportResponse};
use crate::core::error::{NetworkError, TransportError};
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body excerpt carried in a status error
const STATUS_MESSAGE_LIMIT: usize = 256;

/// Retry parameters resolved for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry_count + 1`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count.saturating_add(1))
    }
}

/// Result of a request together with its attempt bookkeeping
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<TransportResponse, NetworkError>,
    pub retry_count: u32,
    pub timeouts: u32,
}

enum AttemptError {
    Retryable(NetworkError),
    Fatal(NetworkError),
}

impl AttemptError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Retryable(NetworkError::Timeout(_)) | Self::Fatal(NetworkError::Timeout(_)) => {
                "timeout"
            }
            Self::Retryable(NetworkError::Status { .. })
            | Self::Fatal(NetworkError::Status { .. }) => "status",
            _ => "transport",
        }
    }
}

/// Timeout and retry wrapper around a transport
pub struct RetryCoordinator {
    transport: SharedTransport,
    classifier: StatusClassifier,
}

impl RetryCoordinator {
    pub fn new(transport: SharedTransport, classifier: StatusClassifier) -> Self {
        Self {
            transport,
            classifier,
        }
    }

    /// Execute `request` under `policy`
    ///
    /// `admit` is awaited before every attempt and its guard is held for the
    /// duration of that attempt only, so backoff sleeps never occupy a slot.
    pub async fn execute<A, Fut, P>(
        &self,
        request: &NetworkRequest,
        policy: &RetryPolicy,
        mut admit: A,
    ) -> RetryOutcome
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<P, NetworkError>>,
    {
        let mut retry_count = 0;
        let mut timeouts = 0;

        loop {
            let permit = match admit().await {
                Ok(permit) => permit,
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        retry_count,
                        timeouts,
                    };
                }
            };
            let attempt = self.attempt(request, policy.timeout).await;
            drop(permit);

            let error = match attempt {
                Ok(response) => {
                    return RetryOutcome {
                        result: Ok(response),
                        retry_count,
                        timeouts,
                    };
                }
                Err(error) => error,
            };

            if let AttemptError::Retryable(NetworkError::Timeout(_)) = &error {
                timeouts += 1;
            }

            match error {
                AttemptError::Fatal(e) => {
                    debug!("Request {} failed without retry: {}", request.id, e);
                    return RetryOutcome {
                        result: Err(e),
                        retry_count,
                        timeouts,
                    };
                }
                AttemptError::Retryable(e) if retry_count >= policy.max_retries => {
                    warn!(
                        "Request {} {} failed after {} retries: {}",
                        request.method, request.url, retry_count, e
                    );
                    return RetryOutcome {
                        result: Err(e),
                        retry_count,
                        timeouts,
                    };
                }
                retryable => {
                    let delay = policy.delay_for(retry_count);
                    metrics::record_retry(retryable.reason());
                    debug!(
                        "Retrying request {} in {:?} (retry {}/{})",
                        request.id,
                        delay,
                        retry_count + 1,
                        policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &NetworkRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, AttemptError> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) => return Err(AttemptError::Retryable(NetworkError::Timeout(timeout))),
            Ok(Err(TransportError::InvalidRequest(msg))) => {
                return Err(AttemptError::Fatal(NetworkError::InvalidRequest(msg)));
            }
            Ok(Err(e)) => return Err(AttemptError::Retryable(NetworkError::Transport(e))),
            Ok(Ok(response)) => response,
        };

        match (self.classifier)(response.status) {
            StatusClass::Success => Ok(response),
            StatusClass::Retryable => Err(AttemptError::Retryable(status_error(&response))),
            StatusClass::Fatal => Err(AttemptError::Fatal(status_error(&response))),
        }
    }
}

fn status_error(response: &TransportResponse) -> NetworkError {
    let mut message = String::from_utf8_lossy(&response.body).into_owned();
    if message.len() > STATUS_MESSAGE_LIMIT {
        let mut cut = STATUS_MESSAGE_LIMIT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    NetworkError::Status {
        status: response.status,
        message,
    }
}
