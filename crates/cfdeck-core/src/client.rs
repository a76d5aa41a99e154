//! Capabilities the dashboard consumes from the platform client layer.

use crate::{DeploymentInfo, LineBatch, Resource, ServiceKind, SessionId};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },
    #[error("{command} failed: {detail}")]
    Command { command: String, detail: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Items delivered by an open tail stream. The stream ends when the sender
/// side is dropped.
pub type LineReceiver = mpsc::Receiver<Result<LineBatch, ClientError>>;
pub type LineSender = mpsc::Sender<Result<LineBatch, ClientError>>;

#[derive(Debug)]
pub struct OpenedTail {
    pub id: SessionId,
    pub lines: LineReceiver,
}

/// Result of a deployment lookup. `deployment == None` means the script was
/// confirmed to have no active deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentStatus {
    pub deployment: Option<DeploymentInfo>,
    pub subdomain: String,
}

#[async_trait]
pub trait ResourceLister: Send + Sync {
    async fn list_resources(
        &self,
        account_id: &str,
        service: ServiceKind,
    ) -> Result<Vec<Resource>, ClientError>;
}

#[async_trait]
pub trait DeploymentSource: Send + Sync {
    async fn fetch_deployment(
        &self,
        account_id: &str,
        script_name: &str,
    ) -> Result<DeploymentStatus, ClientError>;
}

#[async_trait]
pub trait TailClient: Send + Sync {
    async fn open_tail(&self, account_id: &str, script_name: &str)
        -> Result<OpenedTail, ClientError>;

    /// May block on remote acknowledgement; callers run it off the consumer loop.
    async fn close_tail(&self, session: &SessionId) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_reports_seconds() {
        let err = ClientError::Timeout {
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "timed out after 30s");
        let err = ClientError::Command {
            command: "wrangler tail".to_string(),
            detail: "exit status 1".to_string(),
        };
        assert_eq!(err.to_string(), "wrangler tail failed: exit status 1");
    }
}
