use crate::{LineBatch, LogLevel, LogLine};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_LINE_BYTES: usize = 256 * 1024;

/// One live-tail event as emitted by the streaming CLI in JSON mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TailEventRecord {
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub script_name: Option<String>,
    #[serde(default)]
    pub event_timestamp: Option<i64>,
    #[serde(default)]
    pub logs: Vec<ConsoleRecord>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionRecord>,
    #[serde(default)]
    pub event: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleRecord {
    #[serde(default)]
    pub message: Vec<Value>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExceptionRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl TailEventRecord {
    /// Request summary first, then console output, then exceptions.
    pub fn to_lines(&self) -> LineBatch {
        let event_at = ms_to_datetime(self.event_timestamp);
        let mut lines = Vec::with_capacity(1 + self.logs.len() + self.exceptions.len());

        if let Some(summary) = self.request_summary() {
            lines.push(LogLine {
                timestamp: event_at,
                level: LogLevel::Request,
                text: summary,
            });
        }

        for log in &self.logs {
            let level = log
                .level
                .as_deref()
                .and_then(|raw| raw.parse::<LogLevel>().ok())
                .unwrap_or_default();
            lines.push(LogLine {
                timestamp: log
                    .timestamp
                    .map(|ms| ms_to_datetime(Some(ms)))
                    .unwrap_or(event_at),
                level,
                text: join_message_parts(&log.message),
            });
        }

        for exception in &self.exceptions {
            let text = if exception.name.is_empty() {
                exception.message.clone()
            } else {
                format!("{}: {}", exception.name, exception.message)
            };
            lines.push(LogLine {
                timestamp: exception
                    .timestamp
                    .map(|ms| ms_to_datetime(Some(ms)))
                    .unwrap_or(event_at),
                level: LogLevel::Error,
                text,
            });
        }

        lines
    }

    fn request_summary(&self) -> Option<String> {
        let event = self.event.as_ref()?;
        let request = event.get("request");
        let method = request
            .and_then(|req| req.get("method"))
            .and_then(Value::as_str);
        let url = request.and_then(|req| req.get("url")).and_then(Value::as_str);
        let status = event
            .get("response")
            .and_then(|resp| resp.get("status"))
            .and_then(Value::as_u64);
        let cron = event.get("cron").and_then(Value::as_str);

        let mut parts = Vec::new();
        match (method, url, cron) {
            (Some(method), Some(url), _) => parts.push(format!("{method} {url}")),
            (None, Some(url), _) => parts.push(url.to_string()),
            (_, None, Some(cron)) => parts.push(format!("cron {cron}")),
            _ => return None,
        }
        if let Some(status) = status {
            parts.push(status.to_string());
        }
        if let Some(outcome) = self.outcome.as_deref() {
            parts.push(format!("({outcome})"));
        }
        Some(parts.join(" "))
    }
}

fn join_message_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .map(|part| match part {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn ms_to_datetime(value: Option<i64>) -> DateTime<Utc> {
    value
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Why a line of tail output was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkippedLine {
    #[error("tail line of {size} bytes exceeds {max}")]
    Oversized { size: usize, max: usize },
    #[error("tail line is not an event: {0}")]
    Malformed(String),
}

/// Output of one decoder step: projected log lines in stream order, plus the
/// lines that were dropped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLines {
    pub lines: LineBatch,
    pub skipped: Vec<SkippedLine>,
}

/// Turns raw tail stdout into log lines. Input is newline-delimited JSON, one
/// [`TailEventRecord`] per line, split across reads at arbitrary points.
///
/// A line longer than `max_line_bytes` is not buffered: its bytes are counted
/// until the next newline and reported once as [`SkippedLine::Oversized`].
#[derive(Debug)]
pub struct TailLineDecoder {
    max_line_bytes: usize,
    partial: Vec<u8>,
    overflow: Option<usize>,
}

impl Default for TailLineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl TailLineDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            partial: Vec::new(),
            overflow: None,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> DecodedLines {
        let mut out = DecodedLines::default();
        let mut rest = chunk;
        while let Some(idx) = rest.iter().position(|byte| *byte == b'\n') {
            self.absorb(&rest[..idx]);
            self.end_line(&mut out);
            rest = &rest[idx + 1..];
        }
        self.absorb(rest);
        out
    }

    /// Flushes a final line that was never newline-terminated.
    pub fn finish(&mut self) -> DecodedLines {
        let mut out = DecodedLines::default();
        self.end_line(&mut out);
        out
    }

    fn absorb(&mut self, bytes: &[u8]) {
        if let Some(seen) = self.overflow.as_mut() {
            *seen += bytes.len();
            return;
        }
        if self.partial.len() + bytes.len() > self.max_line_bytes {
            self.overflow = Some(self.partial.len() + bytes.len());
            self.partial.clear();
            return;
        }
        self.partial.extend_from_slice(bytes);
    }

    fn end_line(&mut self, out: &mut DecodedLines) {
        if let Some(size) = self.overflow.take() {
            out.skipped.push(SkippedLine::Oversized {
                size,
                max: self.max_line_bytes,
            });
            return;
        }
        let line = std::mem::take(&mut self.partial);
        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match serde_json::from_slice::<TailEventRecord>(line) {
            Ok(record) => out.lines.extend(record.to_lines()),
            Err(err) => out.skipped.push(SkippedLine::Malformed(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH_EVENT: &str = r#"{"outcome":"ok","scriptName":"api","eventTimestamp":1760000000000,"logs":[{"message":["user",42,{"ok":true}],"level":"warn","timestamp":1760000000005}],"exceptions":[{"name":"TypeError","message":"x is undefined","timestamp":1760000000009}],"event":{"request":{"url":"https://api.example.com/v1","method":"POST"},"response":{"status":500}}}"#;

    #[test]
    fn fetch_event_projects_to_ordered_lines() {
        let record: TailEventRecord = serde_json::from_str(FETCH_EVENT).expect("decode event");
        let lines = record.to_lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].level, LogLevel::Request);
        assert_eq!(lines[0].text, "POST https://api.example.com/v1 500 (ok)");
        assert_eq!(lines[1].level, LogLevel::Warn);
        assert_eq!(lines[1].text, r#"user 42 {"ok":true}"#);
        assert_eq!(lines[1].timestamp.timestamp_millis(), 1_760_000_000_005);
        assert_eq!(lines[2].level, LogLevel::Error);
        assert_eq!(lines[2].text, "TypeError: x is undefined");
    }

    #[test]
    fn scheduled_event_summarises_cron() {
        let record: TailEventRecord = serde_json::from_str(
            r#"{"outcome":"ok","eventTimestamp":1760000000000,"event":{"cron":"*/5 * * * *"}}"#,
        )
        .expect("decode cron");
        let lines = record.to_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "cron */5 * * * * (ok)");
    }

    #[test]
    fn decoder_recovers_after_malformed_line() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(FETCH_EVENT.as_bytes());
        chunk.extend_from_slice(b"\n{\"outcome\":\n");
        chunk.extend_from_slice(FETCH_EVENT.as_bytes());
        chunk.extend_from_slice(b"\r\n\n");

        let mut decoder = TailLineDecoder::default();
        let out = decoder.feed(&chunk);
        assert_eq!(out.lines.len(), 6);
        assert_eq!(out.lines[3].level, LogLevel::Request);
        assert_eq!(out.skipped.len(), 1);
        assert!(matches!(out.skipped[0], SkippedLine::Malformed(_)));
    }

    #[test]
    fn decoder_joins_a_line_split_across_reads() {
        let bytes = FETCH_EVENT.as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        let mut decoder = TailLineDecoder::default();

        assert_eq!(decoder.feed(head), DecodedLines::default());
        assert_eq!(decoder.feed(tail), DecodedLines::default());

        let last = decoder.finish();
        assert_eq!(last.lines.len(), 3);
        assert_eq!(last.lines[2].text, "TypeError: x is undefined");
        assert!(decoder.finish().lines.is_empty());
    }

    #[test]
    fn oversized_line_is_reported_once_and_the_next_line_survives() {
        let blob = format!("{{\"blob\":\"{}\"}}", "x".repeat(2_000));
        let (first, second) = blob.as_bytes().split_at(700);
        let mut decoder = TailLineDecoder::new(1_024);

        let out = decoder.feed(first);
        assert!(out.skipped.is_empty());
        let mut rest = second.to_vec();
        rest.extend_from_slice(b"\n{\"outcome\":\"ok\",\"event\":{\"cron\":\"0 * * * *\"}}\n");
        let out = decoder.feed(&rest);

        assert_eq!(
            out.skipped,
            vec![SkippedLine::Oversized {
                size: blob.len(),
                max: 1_024
            }]
        );
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0].text, "cron 0 * * * * (ok)");
    }
}
