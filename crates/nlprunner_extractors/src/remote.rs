//! NLPRP HTTP client extractor (spec.md §4.4): batches content to a remote
//! processing service, honouring size limits, a per-instance rate limit,
//! retry-with-backoff, and queued-mode polling.

use crate::registry::Extractor;
use crate::{ExtractionInput, ExtractionOutcome, ExtractorError, FieldRow};
use nlprunner_protocol::{
    Command, ContentItem, FetchFromQueueResponse, ProcessResponse, ProcessorDescriptor,
    ProcessorRequest, QueueEntryStatus, Request, Response, SchemaType,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for one `[processor:NAME]` remote-service section.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub name: String,
    pub version: String,
    pub base_url: String,
    pub processor_name: String,
    pub max_records_per_request: usize,
    pub max_content_length: usize,
    pub rate_limit_hz: f64,
    pub max_tries: u32,
    pub stop_at_failure: bool,
    pub queue: bool,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>, base_url: impl Into<String>, processor_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            base_url: base_url.into(),
            processor_name: processor_name.into(),
            max_records_per_request: 100,
            max_content_length: 1_000_000,
            rate_limit_hz: 10.0,
            max_tries: 3,
            stop_at_failure: false,
            queue: false,
        }
    }
}

/// A simple per-instance token bucket. spec.md §9 resolves the
/// cross-process rate-limiting open question by keeping this local to one
/// `RemoteExtractor` instance: operators running N worker shards divide
/// their desired aggregate rate by N in each shard's `rate_limit_hz`,
/// rather than the controller running a shared limiter service.
struct RateLimiter {
    min_interval: Duration,
    last_call: StdMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(rate_hz: f64) -> Self {
        let min_interval = if rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / rate_hz)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_call: StdMutex::new(None),
        }
    }

    async fn wait_turn(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait_for = {
            let mut last_call = self.last_call.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            let wait = match *last_call {
                Some(last) if now.duration_since(last) < self.min_interval => self.min_interval - now.duration_since(last),
                _ => Duration::ZERO,
            };
            *last_call = Some(now + wait);
            wait
        };
        if !wait_for.is_zero() {
            sleep(wait_for).await;
        }
    }
}

/// Drives a remote NLPRP service over HTTPS.
pub struct RemoteExtractor {
    config: RemoteConfig,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl RemoteExtractor {
    pub fn new(config: RemoteConfig) -> Result<Self, ExtractorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ExtractorError::Remote)?;
        let limiter = RateLimiter::new(config.rate_limit_hz);
        Ok(Self { config, client, limiter })
    }

    async fn send_request(&self, command: Command) -> Result<Response<ProcessResponse>, ExtractorError> {
        let request = Request::new(command);
        let mut attempt = 0;
        let mut last_err = None;

        while attempt < self.config.max_tries {
            attempt += 1;
            self.limiter.wait_turn().await;

            let result = self
                .client
                .post(format!("{}/nlprp", self.config.base_url))
                .json(&request)
                .send()
                .await;

            match result {
                Ok(resp) => match resp.json::<Response<ProcessResponse>>().await {
                    Ok(body) => return Ok(body),
                    Err(e) => last_err = Some(ExtractorError::Remote(e)),
                },
                Err(e) => last_err = Some(ExtractorError::Remote(e)),
            }

            if attempt < self.config.max_tries {
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                warn!(processor = %self.config.name, attempt, "remote NLPRP request failed, retrying after backoff");
                sleep(backoff).await;
            }
        }

        Err(last_err.unwrap_or(ExtractorError::MaxTriesExceeded(self.config.max_tries)))
    }

    async fn process_one_chunk(&self, chunk: &[ExtractionInput]) -> Vec<ExtractionOutcome> {
        let total_bytes: usize = chunk.iter().map(|c| c.text.len()).sum();
        if total_bytes > self.config.max_content_length {
            return chunk
                .iter()
                .map(|c| ExtractionOutcome::failure(c.record_id.clone(), "chunk exceeds max_content_length"))
                .collect();
        }

        let content: Vec<ContentItem> = chunk
            .iter()
            .map(|c| ContentItem::new(c.text.clone()).with_metadata(serde_json::json!({"record_id": c.record_id})))
            .collect();

        let command = Command::Process {
            content,
            processors: vec![ProcessorRequest::named(self.config.processor_name.clone())],
            queue: self.config.queue,
            client_job_id: None,
        };

        let response = match self.send_request(command).await {
            Ok(r) => r,
            Err(e) => {
                return chunk
                    .iter()
                    .map(|c| ExtractionOutcome::failure(c.record_id.clone(), e.to_string()))
                    .collect();
            }
        };

        if !response.is_ok() {
            let message = response
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "remote NLPRP request failed".to_string());
            return chunk
                .iter()
                .map(|c| ExtractionOutcome::failure(c.record_id.clone(), message.clone()))
                .collect();
        }

        match response.payload {
            Some(ProcessResponse::Immediate(immediate)) => map_immediate_results(chunk, immediate.results),
            Some(ProcessResponse::Queued(queued)) => self.poll_queue(chunk, queued.queue_id).await,
            None => chunk
                .iter()
                .map(|c| ExtractionOutcome::failure(c.record_id.clone(), "ok response had no payload"))
                .collect(),
        }
    }

    /// Poll `fetch_from_queue` until the entry is ready, recording
    /// `queue_id` bookkeeping the caller can persist for crash recovery
    /// (spec.md §4.4 "queued-mode bookkeeping"). A bounded number of polls
    /// guards against a server that never completes the job.
    async fn poll_queue(&self, chunk: &[ExtractionInput], queue_id: String) -> Vec<ExtractionOutcome> {
        const MAX_POLLS: u32 = 60;
        const POLL_INTERVAL: Duration = Duration::from_secs(2);

        for _ in 0..MAX_POLLS {
            let command = Command::FetchFromQueue { queue_id: queue_id.clone() };
            match self.send_request(command).await {
                Ok(response) if response.is_ok() => match response.payload {
                    Some(ProcessResponse::Immediate(immediate)) => return map_immediate_results(chunk, immediate.results),
                    _ => {
                        sleep(POLL_INTERVAL).await;
                        continue;
                    }
                },
                Ok(_) | Err(_) => {
                    sleep(POLL_INTERVAL).await;
                }
            }
        }

        chunk
            .iter()
            .map(|c| ExtractionOutcome::failure(c.record_id.clone(), format!("queue entry {queue_id} never became ready")))
            .collect()
    }

    pub async fn fetch_existing_queue_entry(&self, queue_id: &str) -> Result<FetchFromQueueResponse, ExtractorError> {
        let response = self.send_request(Command::FetchFromQueue { queue_id: queue_id.to_string() }).await?;
        match response.payload {
            Some(ProcessResponse::Immediate(immediate)) => Ok(FetchFromQueueResponse::Ready(immediate)),
            _ => Ok(FetchFromQueueResponse::Busy { status: QueueEntryStatus::Busy }),
        }
    }
}

fn map_immediate_results(
    chunk: &[ExtractionInput],
    mut results: Vec<nlprunner_protocol::ContentResult>,
) -> Vec<ExtractionOutcome> {
    while results.len() < chunk.len() {
        results.push(nlprunner_protocol::ContentResult {
            metadata: None,
            processors: Vec::new(),
        });
    }

    chunk
        .iter()
        .zip(results)
        .map(|(input, content_result)| {
            let mut rows = Vec::new();
            let mut error = None;
            for processor_result in &content_result.processors {
                if !processor_result.success {
                    error = processor_result.error.clone().or(Some("remote processor reported failure".to_string()));
                    continue;
                }
                for value in &processor_result.results {
                    if let serde_json::Value::Object(map) = value {
                        let fields: HashMap<String, serde_json::Value> = map.clone().into_iter().collect();
                        rows.push(FieldRow {
                            table: processor_result.name.clone(),
                            fields,
                        });
                    }
                }
            }
            match error {
                Some(e) if rows.is_empty() => ExtractionOutcome::failure(input.record_id.clone(), e),
                _ => ExtractionOutcome::success(input.record_id.clone(), rows),
            }
        })
        .collect()
}

impl Extractor for RemoteExtractor {
    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor {
            name: self.config.name.clone(),
            title: self.config.name.clone(),
            version: self.config.version.clone(),
            is_default_version: true,
            schema_type: SchemaType::Unknown,
            tabular_schema: None,
            sql_dialect: None,
        }
    }

    fn process_batch<'a>(
        &'a self,
        inputs: Vec<ExtractionInput>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ExtractionOutcome>, ExtractorError>> + Send + 'a>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(inputs.len());
            for chunk in inputs.chunks(self.config.max_records_per_request) {
                let chunk_outcomes = self.process_one_chunk(chunk).await;
                let any_failed = chunk_outcomes.iter().any(|o| !o.is_success());
                outcomes.extend(chunk_outcomes);

                if any_failed && self.config.stop_at_failure {
                    info!(processor = %self.config.name, "stopping remote batch early: stop_at_failure");
                    break;
                }
            }
            Ok(outcomes)
        })
    }
}
