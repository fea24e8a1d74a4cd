//! Whole-envelope round-trip and queued-mode preservation tests
//! (spec.md §8 "Protocol round-trip" / "Queued-mode preservation").

use nlprunner_protocol::{
    Command, ContentItem, ContentResult, ErrorDetail, ProcessResponse, ProcessResponseImmediate,
    ProcessResponseQueued, ProcessorRequest, ProcessorResult, Request, Response, ServerInfo,
};

fn server_info() -> ServerInfo {
    ServerInfo {
        name: "nlprunner-server".to_string(),
        version: "0.1.0".to_string(),
        id: Some("node-1".to_string()),
    }
}

#[test]
fn immediate_process_request_round_trips_byte_for_byte_semantics() {
    let command = Command::Process {
        content: vec![
            ContentItem::new("CRP 45 mg/L").with_metadata(serde_json::json!({"rid": "RID001"})),
            ContentItem::new("MMSE 28/30"),
        ],
        processors: vec![ProcessorRequest::named("crp_finder")],
        queue: false,
        client_job_id: Some("job-abc".to_string()),
    };
    let request = Request::new(command.clone());

    let encoded = serde_json::to_string(&request).unwrap();
    let decoded: Request<Command> = serde_json::from_str(&encoded).unwrap();

    assert_eq!(decoded.protocol, request.protocol);
    assert_eq!(decoded.command, command);
}

#[test]
fn process_response_round_trips_with_results() {
    let payload = ProcessResponseImmediate {
        results: vec![ContentResult {
            metadata: Some(serde_json::json!({"rid": "RID001"})),
            processors: vec![ProcessorResult {
                name: "crp_finder".to_string(),
                version: "1.0".to_string(),
                error: None,
                success: true,
                results: vec![serde_json::json!({"value_mg_l": 45.0})],
            }],
        }],
    };
    let response = Response::ok(server_info(), payload.clone());

    let encoded = serde_json::to_string(&response).unwrap();
    let decoded: Response<ProcessResponseImmediate> = serde_json::from_str(&encoded).unwrap();

    assert!(decoded.is_ok());
    assert_eq!(decoded.payload.unwrap(), payload);
}

#[test]
fn error_response_carries_error_details_and_no_payload() {
    let response: Response<ProcessResponseImmediate> = Response::error(
        server_info(),
        vec![ErrorDetail::new("too_many_records", "content exceeds limit")],
    );

    let encoded = serde_json::to_string(&response).unwrap();
    let decoded: Response<ProcessResponseImmediate> = serde_json::from_str(&encoded).unwrap();

    assert!(!decoded.is_ok());
    assert_eq!(decoded.errors.len(), 1);
    assert_eq!(decoded.errors[0].code, "too_many_records");
    assert!(decoded.payload.is_none());
}

/// Queued-mode preservation: a `process` request with `queue: true` yields a
/// `queue_id`-only response, distinct from the immediate-results shape, and
/// that queue_id is exactly what a later `fetch_from_queue` must echo.
#[test]
fn queued_process_response_preserves_queue_id_for_later_fetch() {
    let queued = ProcessResponse::Queued(ProcessResponseQueued {
        queue_id: "queue-xyz".to_string(),
    });
    let response = Response::ok(server_info(), queued);

    let encoded = serde_json::to_string(&response).unwrap();
    let decoded: Response<ProcessResponse> = serde_json::from_str(&encoded).unwrap();

    match decoded.payload.unwrap() {
        ProcessResponse::Queued(q) => assert_eq!(q.queue_id, "queue-xyz"),
        ProcessResponse::Immediate(_) => panic!("expected queued response"),
    }

    let fetch = Command::FetchFromQueue {
        queue_id: "queue-xyz".to_string(),
    };
    let fetch_request = Request::new(fetch);
    let fetch_encoded = serde_json::to_string(&fetch_request).unwrap();
    let fetch_decoded: Request<Command> = serde_json::from_str(&fetch_encoded).unwrap();
    match fetch_decoded.command {
        Command::FetchFromQueue { queue_id } => assert_eq!(queue_id, "queue-xyz"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn list_processors_request_has_only_the_command_tag() {
    let request = Request::new(Command::ListProcessors);
    let encoded = serde_json::to_value(&request).unwrap();
    assert_eq!(encoded["command"], serde_json::json!("list_processors"));
    assert_eq!(encoded["protocol"]["name"], serde_json::json!("nlprp"));
}
