//! Caller-identity resolution for the build account.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ForgeError, Result};

/// Identity service that resolves the account behind the current credentials.
///
/// The real implementation shells out to the AWS CLI; tests use
/// [`crate::fakes::StaticIdentity`].
#[async_trait]
pub trait CallerIdentity: Send + Sync {
    /// Numeric account id of the calling credentials.
    async fn account_id(&self) -> Result<String>;
}

/// Resolves the caller account via `aws sts get-caller-identity`.
pub struct StsCliIdentity;

#[async_trait]
impl CallerIdentity for StsCliIdentity {
    async fn account_id(&self) -> Result<String> {
        let output = Command::new("aws")
            .args([
                "sts",
                "get-caller-identity",
                "--query",
                "Account",
                "--output",
                "text",
            ])
            .output()
            .await
            .map_err(|e| ForgeError::Identity(format!("failed to run aws cli: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::Identity(format!(
                "sts get-caller-identity failed: {stderr}"
            )));
        }

        let account = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ForgeError::Identity(format!(
                "sts returned an invalid account id: {account:?}"
            )));
        }

        Ok(account)
    }
}
