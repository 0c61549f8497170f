//! Shared fixtures for the provisioning integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dockvirt_provision::{CommandOutput, Fetcher, ProvisionError, Result};

/// Contents every successful test download produces.
pub const IMAGE_BYTES: &[u8] = b"QFI\xfb test base image";

/// Fetcher that writes canned bytes instead of touching the network.
///
/// The first `fail_first` calls write half the payload and then fail, like a
/// transfer cut off mid-stream.
#[derive(Debug, Default)]
pub struct TestFetcher {
    calls: AtomicUsize,
    fail_first: usize,
    delay: Duration,
}

impl TestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for TestFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if call < self.fail_first {
            tokio::fs::write(dest, &IMAGE_BYTES[..IMAGE_BYTES.len() / 2])
                .await
                .map_err(|e| ProvisionError::io(dest, e))?;
            return Err(ProvisionError::Download {
                source_url: source.to_string(),
                detail: "connection reset by peer".to_string(),
            });
        }

        tokio::fs::write(dest, IMAGE_BYTES)
            .await
            .map_err(|e| ProvisionError::io(dest, e))?;
        Ok(IMAGE_BYTES.len() as u64)
    }
}

/// virsh's answer for a domain that does not exist.
pub fn no_such_domain(name: &str) -> CommandOutput {
    CommandOutput::failure(
        1,
        format!("error: failed to get domain '{name}'\nerror: Domain not found\n"),
    )
}
