// Client construction options; also storable as an item of their own.
use super::retry::RetryPolicy;
use super::validation::{Validate, ValidationIssue};
use crate::core::duration_ms;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    /// Skip TLS certificate verification.
    pub insecure_transport: bool,
    /// Budget for one call, retries included.
    #[serde(with = "duration_ms")]
    #[schemars(with = "u64")]
    pub request_timeout: Duration,
    #[serde(skip)]
    #[schemars(skip)]
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            insecure_transport: true,
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    pub fn with_insecure_transport(mut self, insecure: bool) -> Self {
        self.insecure_transport = insecure;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Validate for ClientOptions {
    fn validate(&self) -> Result<(), ValidationIssue> {
        if self.request_timeout < MIN_REQUEST_TIMEOUT {
            return Err(ValidationIssue::new("timeout must be at least 30 secs")
                .with_field("requestTimeout"));
        }
        Ok(())
    }
}
