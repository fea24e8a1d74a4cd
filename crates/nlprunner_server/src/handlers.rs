//! Axum wiring for the NLPRP surface: one `POST /nlprp` endpoint dispatching
//! on `Command`, plus a `GET /health` ops route outside the envelope
//! (spec.md §4.5). Architecturally this mirrors the teacher's sentinel
//! control plane (resolve identity, dispatch on a command tag, report
//! queue state back to the submitter) with ZMQ swapped for HTTP.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use nlprunner_extractors::{ExtractionInput, Extractor, ExtractorRegistry};
use nlprunner_protocol::{
    Command, ContentItem, ContentResult, DeleteFromQueueResponse, FetchFromQueueResponse,
    ProcessResponse, ProcessResponseImmediate, ProcessResponseQueued, ProcessorRequest,
    ProcessorResult, ProtocolError, Request, Response, ServerInfo, ShowQueueResponse,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ServerError;
use crate::queue::QueueStore;
use crate::session::{Session, SessionStore};

/// Shared server state: sessions, the outstanding-request queue, and the
/// processor registry every `process` command dispatches into.
pub struct AppState {
    pub sessions: SessionStore,
    pub queue: QueueStore,
    pub registry: ExtractorRegistry,
    pub server_info: ServerInfo,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/nlprp", post(nlprp_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ServerError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ServerError::Protocol(ProtocolError::Unauthenticated))
}

async fn nlprp_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<Request<Command>>,
) -> Json<Response<serde_json::Value>> {
    let server_info = state.server_info.clone();

    let outcome = match bearer_token(&headers) {
        Ok(token) => match state.sessions.resolve(token).await {
            Ok(session) => dispatch(&state, &session, request.command).await,
            Err(e) => Err(ServerError::Protocol(e)),
        },
        Err(e) => Err(e),
    };

    match outcome {
        Ok(payload) => Json(Response::ok(server_info, payload)),
        Err(err) => Json(Response::error(server_info, vec![err.to_error_detail()])),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, ServerError> {
    serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))
}

async fn dispatch(state: &Arc<AppState>, session: &Session, command: Command) -> Result<serde_json::Value, ServerError> {
    match command {
        Command::ListProcessors => to_json(nlprunner_protocol::ListProcessorsResponse {
            processors: state.registry.list_descriptors(),
        }),

        Command::Process {
            content,
            processors,
            queue,
            client_job_id: _,
        } => {
            for p in &processors {
                if !session.permissions.is_allowed(&p.name) {
                    return Err(ServerError::Protocol(ProtocolError::ProcessorNotPermitted { name: p.name.clone() }));
                }
            }

            if queue {
                let queue_id = state.queue.submit(session.session_id.clone()).await;
                let worker_state = Arc::clone(state);
                let qid = queue_id.as_str().to_string();
                tokio::spawn(async move {
                    if let Ok(result) = run_processors(&worker_state.registry, &content, &processors).await {
                        worker_state.queue.complete(&qid, result).await;
                    }
                });
                return to_json(ProcessResponse::Queued(ProcessResponseQueued {
                    queue_id: queue_id.as_str().to_string(),
                }));
            }

            let result = run_processors(&state.registry, &content, &processors).await?;
            to_json(ProcessResponse::Immediate(result))
        }

        Command::ShowQueue => to_json(ShowQueueResponse {
            queue: state.queue.show_queue(&session.session_id).await,
        }),

        Command::FetchFromQueue { queue_id } => {
            let (status, result) = state
                .queue
                .fetch(&session.session_id, &queue_id)
                .await
                .map_err(ServerError::Protocol)?;
            let response = if status.is_ready() {
                FetchFromQueueResponse::Ready(result.unwrap_or(ProcessResponseImmediate { results: Vec::new() }))
            } else {
                FetchFromQueueResponse::Busy { status }
            };
            to_json(response)
        }

        Command::DeleteFromQueue { queue_id } => {
            let deleted = state
                .queue
                .delete(&session.session_id, queue_id.as_deref())
                .await
                .map_err(ServerError::Protocol)?;
            to_json(DeleteFromQueueResponse { deleted })
        }
    }
}

/// Runs every requested processor over every content item and reassembles
/// per-item `ContentResult`s (spec.md §4.5 "process"). Used for both
/// immediate responses and, in a spawned task, queued ones.
async fn run_processors(
    registry: &ExtractorRegistry,
    content: &[ContentItem],
    processors: &[ProcessorRequest],
) -> Result<ProcessResponseImmediate, ServerError> {
    let mut bound: Vec<(String, String, std::sync::Arc<dyn Extractor>)> = Vec::with_capacity(processors.len());
    for p in processors {
        let extractor = registry.instantiate(&p.name, p.version.as_deref()).map_err(|_| {
            ServerError::Protocol(ProtocolError::ProcessorNotFound {
                name: p.name.clone(),
                version: p.version.clone(),
            })
        })?;
        let version = extractor.describe().version;
        bound.push((p.name.clone(), version, extractor));
    }

    let inputs: Vec<ExtractionInput> = content
        .iter()
        .enumerate()
        .map(|(i, item)| ExtractionInput {
            record_id: i.to_string(),
            text: item.text.clone(),
        })
        .collect();

    let mut results: Vec<ContentResult> = content
        .iter()
        .map(|item| ContentResult {
            metadata: item.metadata.clone(),
            processors: Vec::new(),
        })
        .collect();

    for (name, version, extractor) in &bound {
        let outcomes = extractor
            .process_batch(inputs.clone())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        for outcome in outcomes {
            let Ok(idx) = outcome.record_id.parse::<usize>() else { continue };
            let Some(content_result) = results.get_mut(idx) else { continue };
            let success = outcome.is_success();
            content_result.processors.push(ProcessorResult {
                name: name.clone(),
                version: version.clone(),
                error: outcome.error,
                success,
                results: outcome
                    .rows
                    .into_iter()
                    .map(|row| serde_json::json!({"table": row.table, "fields": row.fields}))
                    .collect(),
            });
        }
    }

    Ok(ProcessResponseImmediate { results })
}
