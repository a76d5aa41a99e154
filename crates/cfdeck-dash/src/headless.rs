//! Line-oriented tailing without the TUI: `cfdeck --headless api billing`.

use crate::config::Config;
use anyhow::{bail, Result};
use cfdeck_core::client::TailClient;
use cfdeck_core::LogLine;
use cfdeck_tail::{TailSessionManager, TailUpdate};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const HEADLESS_ENV: &str = "headless";
const IDLE_CHECK: Duration = Duration::from_secs(1);

pub async fn run_headless(config: &Config, client: Arc<dyn TailClient>) -> Result<()> {
    if config.headless_scripts.is_empty() {
        bail!("--headless needs at least one script name");
    }
    let account_id = config.account_id.clone();
    let (tails, mut tail_rx) = TailSessionManager::new(client);
    let mut tails = tails.with_max_grid(config.max_grid);

    let handles = if config.headless_scripts.len() == 1 {
        vec![tails.start_tail(&account_id, &config.headless_scripts[0])]
    } else {
        tails.start_parallel_tail(HEADLESS_ENV, &account_id, &config.headless_scripts)
    };
    let mut remaining = handles.len();
    info!(event = "headless_started", account_id = %account_id, scripts = remaining);

    let mut idle_ticker = tokio::time::interval(IDLE_CHECK);
    let stdout = io::stdout();
    while remaining > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(event = "headless_interrupted");
                tails.stop_all();
                break;
            }
            _ = idle_ticker.tick() => {
                tails.refresh_idle(config.idle_after);
                tails.reap_teardowns();
            }
            Some(event) = tail_rx.recv() => {
                let Some(update) = tails.handle_event(event, &account_id) else {
                    continue;
                };
                let mut out = stdout.lock();
                match update {
                    TailUpdate::Connected { script_name, session_id, .. } => {
                        eprintln!("[{script_name}] connected");
                        tails.poll_next(&session_id);
                    }
                    TailUpdate::Batch { script_name, session_id, lines, .. } => {
                        for line in &lines {
                            writeln!(out, "{}", format_line(&script_name, line))?;
                        }
                        out.flush()?;
                        tails.poll_next(&session_id);
                    }
                    TailUpdate::ConnectFailed { script_name, error, .. } => {
                        eprintln!("[{script_name}] connect failed: {error}");
                        remaining -= 1;
                    }
                    TailUpdate::StreamFailed { script_name, error, .. } => {
                        eprintln!("[{script_name}] stream failed: {error}");
                        remaining -= 1;
                    }
                    TailUpdate::Closed { script_name, .. } => {
                        eprintln!("[{script_name}] closed");
                        remaining -= 1;
                    }
                    TailUpdate::Discarded { .. } | TailUpdate::TornDown { .. } => {}
                }
            }
        }
    }

    tails.shutdown().await;
    Ok(())
}

fn format_line(script_name: &str, line: &LogLine) -> String {
    format!(
        "[{script_name}] {} {:<7} {}",
        line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        line.level.as_str(),
        line.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfdeck_core::LogLevel;
    use chrono::{TimeZone, Utc};

    #[test]
    fn headless_lines_carry_script_prefix() {
        let line = LogLine {
            timestamp: Utc
                .timestamp_millis_opt(1_760_000_000_123)
                .single()
                .expect("timestamp"),
            level: LogLevel::Warn,
            text: "slow upstream".to_string(),
        };
        assert_eq!(
            format_line("api", &line),
            "[api] 2025-10-09T08:53:20.123Z warn    slow upstream"
        );
    }
}
