//! In-memory fakes for core service traits (testing only)
//!
//! Provides `StaticIdentity` and `FailingIdentity` so context resolution can
//! be exercised without AWS credentials.

use async_trait::async_trait;

use crate::error::{ForgeError, Result};
use crate::identity::CallerIdentity;

/// Identity that always resolves to a fixed account id.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    account: String,
}

impl StaticIdentity {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

#[async_trait]
impl CallerIdentity for StaticIdentity {
    async fn account_id(&self) -> Result<String> {
        Ok(self.account.clone())
    }
}

/// Identity that always fails, for exercising the fatal resolution path.
#[derive(Debug, Clone, Default)]
pub struct FailingIdentity;

#[async_trait]
impl CallerIdentity for FailingIdentity {
    async fn account_id(&self) -> Result<String> {
        Err(ForgeError::Identity(
            "no credentials available".to_string(),
        ))
    }
}
