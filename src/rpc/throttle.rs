//! Per-host request throttle
//!
//! Each host gets its own fair semaphore: waiters are granted permits in the
//! order they queued, so requests to one host start in submission order and
//! the next queued request starts as soon as any in-flight one releases its
//! permit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{WalletError, WalletResult};

pub struct RequestThrottle {
    max_in_flight: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl RequestThrottle {
    /// `max_in_flight == 0` disables throttling
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Wait for a slot on `host`. The slot is held until the returned permit
    /// is dropped; `None` means the throttle is disabled.
    pub async fn acquire(&self, host: &str) -> WalletResult<Option<OwnedSemaphorePermit>> {
        if self.max_in_flight == 0 {
            return Ok(None);
        }

        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                hosts
                    .entry(host.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.max_in_flight))),
            )
        };

        semaphore
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| WalletError::internal(format!("request queue for {} closed", host)))
    }
}
