//! Drives an external co-process over line-oriented stdin/stdout
//! (spec.md §4.3). One record is sent at a time and the reply is read back
//! before the next is written — no pipelining, by design, so a crashed
//! child can never be blamed on the wrong in-flight record.
//!
//! Grounded in `casparian_worker::bridge`'s state machine and restart/crash
//! handling, adapted from its TCP+Arrow IPC framing down to the simpler
//! terminator-delimited text protocol this spec requires.

use crate::registry::Extractor;
use crate::{ExtractionInput, ExtractionOutcome, ExtractorError, FieldRow};
use nlprunner_protocol::ProcessorDescriptor;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Lifecycle of a co-process instance (spec.md §4.3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Ready,
    Busy,
    Crashed,
    Stopped,
}

/// Configuration for one `[processor:NAME]` co-process section.
#[derive(Debug, Clone)]
pub struct CoprocessConfig {
    pub name: String,
    pub version: String,
    pub command: String,
    pub args: Vec<String>,
    pub input_terminator: String,
    pub output_terminator: String,
    pub response_timeout: Duration,
    pub max_external_prog_uses: Option<u32>,
    /// Environment variables applied to the spawned child, sourced from an
    /// `[env:NAME]` section referenced by this processor's config (spec.md
    /// §6).
    pub env: HashMap<String, String>,
}

impl CoprocessConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            command: command.into(),
            args: Vec::new(),
            input_terminator: "\n".to_string(),
            output_terminator: "\n".to_string(),
            response_timeout: Duration::from_secs(30),
            max_external_prog_uses: None,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

struct RunningChild {
    child: Child,
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    uses: u32,
}

/// Drives one external co-process, restarting it once it has served
/// `max_external_prog_uses` records or has crashed.
pub struct CoprocessExtractor {
    config: CoprocessConfig,
    state: Mutex<Option<RunningChild>>,
    restarts: AtomicU32,
}

impl CoprocessExtractor {
    pub fn new(config: CoprocessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
            restarts: AtomicU32::new(0),
        }
    }

    fn spawn(&self) -> Result<RunningChild, ExtractorError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ExtractorError::Io(self.config.name.clone(), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractorError::ProcessCrashed(self.config.name.clone()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::ProcessCrashed(self.config.name.clone()))?;

        info!(processor = %self.config.name, "co-process started");
        Ok(RunningChild {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            uses: 0,
        })
    }

    async fn ensure_running<'a>(&'a self, guard: &mut tokio::sync::MutexGuard<'a, Option<RunningChild>>) -> Result<(), ExtractorError> {
        let needs_restart = match guard.as_mut() {
            None => true,
            Some(running) => {
                let exited = running
                    .child
                    .try_wait()
                    .map_err(|e| ExtractorError::Io(self.config.name.clone(), e))?
                    .is_some();
                let exhausted = self
                    .config
                    .max_external_prog_uses
                    .is_some_and(|max| running.uses >= max);
                exited || exhausted
            }
        };

        if needs_restart {
            if let Some(mut running) = guard.take() {
                let _ = running.child.start_kill();
            }
            self.restarts.fetch_add(1, Ordering::Relaxed);
            **guard = Some(self.spawn()?);
        }

        Ok(())
    }

    async fn exchange_one(&self, running: &mut RunningChild, text: &str) -> Result<String, ExtractorError> {
        let payload = format!("{}{}", text.replace('\n', " "), self.config.input_terminator);
        running
            .stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| ExtractorError::Io(self.config.name.clone(), e))?;
        running
            .stdin
            .flush()
            .await
            .map_err(|e| ExtractorError::Io(self.config.name.clone(), e))?;

        let mut line = String::new();
        let read = timeout(self.config.response_timeout, running.stdout.read_line(&mut line)).await;

        match read {
            Err(_) => Err(ExtractorError::Timeout(self.config.name.clone())),
            Ok(Err(e)) => Err(ExtractorError::Io(self.config.name.clone(), e)),
            Ok(Ok(0)) => Err(ExtractorError::ProcessCrashed(self.config.name.clone())),
            Ok(Ok(_)) => {
                let trimmed = line.trim_end_matches(&self.config.output_terminator).trim_end_matches('\n');
                running.uses += 1;
                Ok(trimmed.to_string())
            }
        }
    }
}

impl Extractor for CoprocessExtractor {
    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::unknown_schema(&self.config.name, &self.config.name, &self.config.version)
    }

    fn process_batch<'a>(
        &'a self,
        inputs: Vec<ExtractionInput>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ExtractionOutcome>, ExtractorError>> + Send + 'a>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(inputs.len());
            let mut guard = self.state.lock().await;

            for input in inputs {
                if let Err(err) = self.ensure_running(&mut guard).await {
                    outcomes.push(ExtractionOutcome::failure(input.record_id, err.to_string()));
                    continue;
                }

                let running = guard.as_mut().expect("ensure_running guarantees Some");
                match self.exchange_one(running, &input.text).await {
                    Ok(line) => outcomes.push(parse_coprocess_line(&input.record_id, &line)),
                    Err(err) => {
                        warn!(processor = %self.config.name, error = %err, "co-process exchange failed");
                        *guard = None;
                        outcomes.push(ExtractionOutcome::failure(input.record_id, err.to_string()));
                    }
                }
            }

            Ok(outcomes)
        })
    }
}

/// Parse one reply line as either a JSON object of fields (one result row)
/// or a JSON array of such objects (multiple result rows), per spec.md
/// §4.3 "co-process reply format".
fn parse_coprocess_line(record_id: &str, line: &str) -> ExtractionOutcome {
    if line.trim().is_empty() {
        return ExtractionOutcome::success(record_id, Vec::new());
    }

    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Array(items)) => {
            let rows = items.into_iter().filter_map(value_to_row).collect();
            ExtractionOutcome::success(record_id, rows)
        }
        Ok(value @ serde_json::Value::Object(_)) => {
            ExtractionOutcome::success(record_id, value_to_row(value).into_iter().collect())
        }
        Ok(_) => ExtractionOutcome::failure(record_id, "co-process reply was not a JSON object or array"),
        Err(e) => ExtractionOutcome::failure(record_id, format!("malformed co-process reply: {e}")),
    }
}

fn value_to_row(value: serde_json::Value) -> Option<FieldRow> {
    let serde_json::Value::Object(map) = value else { return None };
    let table = map
        .get("_table")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let fields: HashMap<String, serde_json::Value> = map.into_iter().filter(|(k, _)| k != "_table").collect();
    Some(FieldRow { table, fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_object_reply() {
        let outcome = parse_coprocess_line("r1", r#"{"_table":"crp_results","value_mg_l":45.0}"#);
        assert!(outcome.is_success());
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].table, "crp_results");
    }

    #[test]
    fn parses_array_of_objects_reply() {
        let outcome = parse_coprocess_line("r1", r#"[{"_table":"t1","a":1},{"_table":"t2","b":2}]"#);
        assert_eq!(outcome.rows.len(), 2);
    }

    #[test]
    fn empty_line_means_no_findings() {
        let outcome = parse_coprocess_line("r1", "");
        assert!(outcome.is_success());
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn malformed_json_is_a_failure() {
        let outcome = parse_coprocess_line("r1", "not json");
        assert!(!outcome.is_success());
    }
}
