use cfdeck_cache::BindingIndex;
use cfdeck_core::client::{ClientError, DeploymentSource, DeploymentStatus, ResourceLister};
use cfdeck_core::{ComputeUnit, Resource, ServiceKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub const FETCH_QUEUE_CAPACITY: usize = 256;

/// Background fetch completions. Every variant carries the account the fetch
/// was issued under so the consumer loop can drop results from a previous
/// account.
#[derive(Debug)]
pub enum FetchEvent {
    Resources {
        account_id: String,
        service: ServiceKind,
        result: Result<Vec<Resource>, ClientError>,
    },
    Deployment {
        account_id: String,
        script_name: String,
        result: Result<DeploymentStatus, ClientError>,
    },
    BindingIndex {
        account_id: String,
        index: BindingIndex,
    },
}

#[derive(Clone)]
pub struct Fetcher {
    lister: Arc<dyn ResourceLister>,
    deployments: Arc<dyn DeploymentSource>,
    tx: mpsc::Sender<FetchEvent>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(
        lister: Arc<dyn ResourceLister>,
        deployments: Arc<dyn DeploymentSource>,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<FetchEvent>) {
        let (tx, rx) = mpsc::channel(FETCH_QUEUE_CAPACITY);
        let fetcher = Self {
            lister,
            deployments,
            tx,
            timeout,
        };
        (fetcher, rx)
    }

    pub fn spawn_resources(&self, account_id: &str, service: ServiceKind) {
        let lister = Arc::clone(&self.lister);
        let tx = self.tx.clone();
        let timeout = self.timeout;
        let account_id = account_id.to_string();
        debug!(event = "fetch_issued", kind = "resources", service = %service, account_id = %account_id);
        tokio::spawn(async move {
            let result = with_timeout(timeout, lister.list_resources(&account_id, service)).await;
            let _ = tx
                .send(FetchEvent::Resources {
                    account_id,
                    service,
                    result,
                })
                .await;
        });
    }

    pub fn spawn_deployment(&self, account_id: &str, script_name: &str) {
        let deployments = Arc::clone(&self.deployments);
        let tx = self.tx.clone();
        let timeout = self.timeout;
        let account_id = account_id.to_string();
        let script_name = script_name.to_string();
        debug!(event = "fetch_issued", kind = "deployment", script = %script_name, account_id = %account_id);
        tokio::spawn(async move {
            let result = with_timeout(
                timeout,
                deployments.fetch_deployment(&account_id, &script_name),
            )
            .await;
            let _ = tx
                .send(FetchEvent::Deployment {
                    account_id,
                    script_name,
                    result,
                })
                .await;
        });
    }

    /// Builds the index off the consumer loop from a listing already in hand.
    pub fn spawn_binding_index(&self, account_id: &str, units: Vec<ComputeUnit>) {
        let tx = self.tx.clone();
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            let index = BindingIndex::build(&units);
            let _ = tx.send(FetchEvent::BindingIndex { account_id, index }).await;
        });
    }
}

pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout { after: timeout }),
    }
}
