//! Batch Coordinator
//!
//! Splits a list of requests into fixed-size groups. Requests inside a group
//! are submitted together; group `i` starts `i * pacing` after the first one,
//! regardless of how long earlier groups take. Results keep input order.

use super::scheduler::RequestScheduler;
use super::types::{NetworkRequest, NetworkResponse};
use crate::core::error::NetworkError;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct BatchCoordinator {
    scheduler: RequestScheduler,
    batch_size: usize,
    pacing: Duration,
}

impl BatchCoordinator {
    /// A `batch_size` of zero is treated as one
    pub fn new(scheduler: RequestScheduler, batch_size: usize, pacing: Duration) -> Self {
        Self {
            scheduler,
            batch_size: batch_size.max(1),
            pacing,
        }
    }

    pub async fn run(
        &self,
        requests: Vec<NetworkRequest>,
    ) -> Vec<Result<NetworkResponse, NetworkError>> {
        if requests.is_empty() {
            return Vec::new();
        }

        let groups = split_groups(requests, self.batch_size);
        debug!(
            "Submitting {} batches of up to {} requests, pacing {:?}",
            groups.len(),
            self.batch_size,
            self.pacing
        );

        let start = Instant::now();
        let batches = groups.into_iter().enumerate().map(|(index, group)| {
            let scheduler = self.scheduler.clone();
            let starts_at = start + self.pacing.saturating_mul(index as u32);
            async move {
                tokio::time::sleep_until(starts_at).await;
                debug!("Starting batch {} with {} requests", index, group.len());
                let submitted: Vec<_> = group
                    .into_iter()
                    .map(|request| scheduler.submit(request))
                    .collect();
                join_all(submitted).await
            }
        });

        join_all(batches).await.into_iter().flatten().collect()
    }
}

fn split_groups(requests: Vec<NetworkRequest>, size: usize) -> Vec<Vec<NetworkRequest>> {
    let mut groups = Vec::with_capacity(requests.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for request in requests {
        current.push(request);
        if current.len() == size {
            groups.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
