//! Capability adapters backed by the platform CLI.
//!
//! Listings and deployment lookups run the configured command once and decode
//! its JSON stdout. Tails keep the child running and decode its stdout as
//! newline-delimited JSON events.

use crate::config::{render_args, AccountEntry, CommandTemplates};
use async_trait::async_trait;
use cfdeck_core::client::{
    ClientError, DeploymentSource, DeploymentStatus, LineSender, OpenedTail, ResourceLister,
    TailClient,
};
use cfdeck_core::tail_wire::{DecodedLines, TailLineDecoder, DEFAULT_MAX_LINE_BYTES};
use cfdeck_core::{DeploymentInfo, Resource, ServiceKind, SessionId};
use serde_json::Value;
use std::collections::HashMap;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ACCOUNT_ENV: &str = "CLOUDFLARE_ACCOUNT_ID";
const TAIL_QUEUE_CAPACITY: usize = 64;
const READ_CHUNK_BYTES: usize = 8 * 1024;

type SharedChildren = Arc<Mutex<HashMap<SessionId, Child>>>;

pub struct CommandClient {
    templates: CommandTemplates,
    subdomains: HashMap<String, String>,
    children: SharedChildren,
    next_session: AtomicU64,
    max_line_bytes: usize,
}

impl CommandClient {
    pub fn new(templates: CommandTemplates, accounts: &[AccountEntry]) -> Self {
        let subdomains = accounts
            .iter()
            .filter_map(|entry| {
                entry
                    .subdomain
                    .as_ref()
                    .map(|sub| (entry.id.clone(), sub.clone()))
            })
            .collect();
        Self {
            templates,
            subdomains,
            children: Arc::new(Mutex::new(HashMap::new())),
            next_session: AtomicU64::new(0),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    fn command(&self, account_id: &str, args: &[String]) -> Command {
        let mut command = Command::new(&self.templates.program);
        command
            .args(args)
            .env(ACCOUNT_ENV, account_id)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn label(&self, args: &[String]) -> String {
        let mut label = self.templates.program.clone();
        for arg in args.iter().take(3) {
            label.push(' ');
            label.push_str(arg);
        }
        label
    }

    async fn run_json(&self, account_id: &str, args: &[String]) -> Result<Value, ClientError> {
        let label = self.label(args);
        debug!(event = "command_run", command = %label, account_id);
        let output = self.command(account_id, args).output().await?;
        if !output.status.success() {
            return Err(command_failure(&label, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(trimmed).map_err(|err| ClientError::Decode(format!("{label}: {err}")))
    }
}

fn lock_children(children: &SharedChildren) -> MutexGuard<'_, HashMap<SessionId, Child>> {
    children
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn command_failure(command: &str, output: &Output) -> ClientError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let detail = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        format!("exited with status {}", output.status)
    };
    ClientError::Command {
        command: command.to_string(),
        detail,
    }
}

/// Accepts a bare array or an API envelope with a `result` array.
pub fn decode_listing(value: Value) -> Result<Vec<Resource>, ClientError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("result") {
            Some(result @ Value::Array(_)) => result,
            _ => return Err(ClientError::Decode("listing has no result array".to_string())),
        },
        _ => return Err(ClientError::Decode("listing is not a JSON array".to_string())),
    };
    serde_json::from_value(items).map_err(|err| ClientError::Decode(err.to_string()))
}

/// `null`, an empty output or an empty list mean the script has no active
/// deployment. A list is treated as newest first.
pub fn decode_deployment(value: Value) -> Result<Option<DeploymentInfo>, ClientError> {
    let value = match value {
        Value::Null => return Ok(None),
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(None),
        },
        Value::Object(mut map) => match map.remove("result") {
            Some(result) => return decode_deployment(result),
            None => Value::Object(map),
        },
        _ => return Err(ClientError::Decode("deployment is not a JSON object".to_string())),
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| ClientError::Decode(err.to_string()))
}

#[async_trait]
impl ResourceLister for CommandClient {
    async fn list_resources(
        &self,
        account_id: &str,
        service: ServiceKind,
    ) -> Result<Vec<Resource>, ClientError> {
        let Some(template) = self.templates.list_args(service) else {
            return Err(ClientError::Unavailable(
                self.templates.missing_list_hint(service),
            ));
        };
        let args = render_args(template, account_id, "");
        let value = self.run_json(account_id, &args).await?;
        decode_listing(value)
    }
}

#[async_trait]
impl DeploymentSource for CommandClient {
    async fn fetch_deployment(
        &self,
        account_id: &str,
        script_name: &str,
    ) -> Result<DeploymentStatus, ClientError> {
        let args = render_args(&self.templates.deployment, account_id, script_name);
        let value = self.run_json(account_id, &args).await?;
        Ok(DeploymentStatus {
            deployment: decode_deployment(value)?,
            subdomain: self.subdomains.get(account_id).cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl TailClient for CommandClient {
    async fn open_tail(
        &self,
        account_id: &str,
        script_name: &str,
    ) -> Result<OpenedTail, ClientError> {
        let args = render_args(&self.templates.tail, account_id, script_name);
        let label = self.label(&args);
        let mut child = self
            .command(account_id, &args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let Some(stdout) = child.stdout.take() else {
            return Err(ClientError::Unavailable(format!("{label}: stdout not captured")));
        };

        let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let id = SessionId::new(format!("{script_name}-{n}"));
        lock_children(&self.children).insert(id.clone(), child);

        let (tx, rx) = mpsc::channel(TAIL_QUEUE_CAPACITY);
        tokio::spawn(pump_tail_output(
            stdout,
            tx,
            Arc::clone(&self.children),
            id.clone(),
            label,
            self.max_line_bytes,
        ));
        info!(event = "tail_process_started", session_id = %id, script = script_name);
        Ok(OpenedTail { id, lines: rx })
    }

    async fn close_tail(&self, session: &SessionId) -> Result<(), ClientError> {
        let child = lock_children(&self.children).remove(session);
        if let Some(mut child) = child {
            child.kill().await?;
            debug!(event = "tail_process_killed", session_id = %session);
        }
        Ok(())
    }
}

async fn pump_tail_output(
    mut stdout: ChildStdout,
    tx: LineSender,
    children: SharedChildren,
    id: SessionId,
    label: String,
    max_line_bytes: usize,
) {
    let mut decoder = TailLineDecoder::new(max_line_bytes);
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                let _ = tx.send(Err(ClientError::Io(err))).await;
                return;
            }
        };
        if !forward_lines(&tx, decoder.feed(&buf[..read]), &id).await {
            return;
        }
    }
    if !forward_lines(&tx, decoder.finish(), &id).await {
        return;
    }

    let child = lock_children(&children).remove(&id);
    let Some(mut child) = child else {
        return;
    };
    match child.wait().await {
        Ok(status) if !status.success() => {
            let _ = tx
                .send(Err(ClientError::Command {
                    command: label,
                    detail: format!("exited with status {status}"),
                }))
                .await;
        }
        Ok(_) => {}
        Err(err) => {
            let _ = tx.send(Err(ClientError::Io(err))).await;
        }
    }
}

/// Returns false once the receiving side is gone.
async fn forward_lines(tx: &LineSender, decoded: DecodedLines, id: &SessionId) -> bool {
    for skipped in &decoded.skipped {
        warn!(event = "tail_line_skipped", session_id = %id, error = %skipped);
    }
    if decoded.lines.is_empty() {
        return true;
    }
    tx.send(Ok(decoded.lines)).await.is_ok()
}
