//! Session lookup from the HTTP principal (spec.md §4.5 "Access control").
//! A session is resolved from the bearer token before any command body
//! beyond `list_processors` is interpreted.

use nlprunner_ids::SessionId;
use nlprunner_protocol::{ProcessorPermissions, ProtocolError};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub user: String,
    pub permissions: ProcessorPermissions,
}

/// Maps bearer tokens to sessions. Grounded in the same "resolve identity
/// before interpreting the request body" shape as the teacher's control
/// plane auth, reduced here to a static token table suitable for a single
/// nlprunner deployment (no distributed session store).
#[derive(Default)]
pub struct SessionStore {
    tokens: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_token(&self, token: impl Into<String>, user: impl Into<String>, permissions: ProcessorPermissions) -> SessionId {
        let session_id = SessionId::new();
        let session = Session {
            session_id: session_id.clone(),
            user: user.into(),
            permissions,
        };
        self.tokens.write().await.insert(token.into(), session);
        session_id
    }

    pub async fn resolve(&self, token: &str) -> Result<Session, ProtocolError> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or(ProtocolError::Unauthenticated)
    }
}
