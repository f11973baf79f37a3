//! Per-request handlers for one client session.
//!
//! A session holds no pagination state: every `getUsers` carries its own page
//! index, so a reconnect or a retry is just another request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use userdir_common::protocol::{
    parse_start, ProtocolError, RequestEnvelope, RequestKind, ServerMessage,
    UserPatch,
};
use userdir_common::record::{page_slice, UserID, UserRecord};

use crate::server::ServerOptions;
use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("User {0} not found")]
    NotFound(UserID),
    #[error("Unable to read store: {0}")]
    StoreRead(StoreError),
    #[error("Unable to write store: {0}")]
    StoreWrite(StoreError),
    #[error("Store read did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

impl SessionError {
    /// Reason shown to the client. Store internals stay in the server log.
    pub fn reason(&self) -> String {
        match self {
            SessionError::Validation(x) => x.clone(),
            SessionError::NotFound(_) => "User not found".into(),
            SessionError::StoreRead(
                StoreError::Parse(_) | StoreError::DuplicateId(_),
            ) => "Database content is malformed".into(),
            SessionError::StoreRead(_) => "Database error".into(),
            SessionError::StoreWrite(_) => "Save failed".into(),
            SessionError::Timeout(_) => "Database read timed out".into(),
            SessionError::TaskFailed(_) => "Processing error".into(),
        }
    }
}

impl From<SessionError> for ServerMessage {
    fn from(value: SessionError) -> Self {
        ServerMessage::Error(value.reason())
    }
}

const INVALID_START: &str =
    "Invalid start parameter. Must be a non-negative number.";

/// Handles requests for one connection against a shared store.
pub struct Session<S: RecordStore> {
    id: uuid::Uuid,
    store: Arc<S>,
    page_size: usize,
    read_timeout: Duration,
}

impl<S: RecordStore> Session<S> {
    pub fn new(id: uuid::Uuid, store: Arc<S>, opts: &ServerOptions) -> Self {
        Self {
            id,
            store,
            page_size: opts.page_size.max(1),
            read_timeout: opts.read_timeout,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Handle one text message from the client.
    ///
    /// Returns the reply to send. A malformed envelope is returned as an
    /// error and must not be answered.
    pub async fn handle_next(
        &self,
        text: &str,
    ) -> Result<ServerMessage, ProtocolError> {
        let envelope = RequestEnvelope::parse(text)?;

        log::debug!("Session {}: {:?} request", self.id, envelope.kind);

        let reply = match envelope.kind {
            RequestKind::GetUsers => self.handle_get_users(&envelope.payload).await,
            RequestKind::UpdateUser => {
                self.handle_update_user(&envelope.payload).await
            }
        };

        Ok(reply)
    }

    /// Produce the page named by `payload.start`.
    pub async fn handle_get_users(&self, payload: &Value) -> ServerMessage {
        match self.get_users(payload).await {
            Ok(users) => ServerMessage::Users(users),
            Err(e) => {
                log::warn!("Session {}: getUsers failed: {e}", self.id);
                e.into()
            }
        }
    }

    /// Replace the editable fields of one record and persist the collection.
    pub async fn handle_update_user(&self, payload: &Value) -> ServerMessage {
        match self.update_user(payload).await {
            Ok(user) => ServerMessage::UserUpdated(user),
            Err(e) => {
                log::warn!("Session {}: updateUser failed: {e}", self.id);
                e.into()
            }
        }
    }

    async fn get_users(
        &self,
        payload: &Value,
    ) -> Result<Vec<UserRecord>, SessionError> {
        let start = parse_start(payload)
            .and_then(|s| usize::try_from(s).ok())
            .ok_or_else(|| SessionError::Validation(INVALID_START.into()))?;

        let users = self.read_all().await?;

        Ok(page_slice(&users, start, self.page_size).to_vec())
    }

    async fn update_user(
        &self,
        payload: &Value,
    ) -> Result<UserRecord, SessionError> {
        let patch = UserPatch::from_payload(payload)
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        let mut users = self.read_all().await?;

        let index = users
            .iter()
            .position(|u| u.id == patch.id)
            .ok_or(SessionError::NotFound(patch.id))?;

        let updated = patch
            .apply(&users[index])
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        users[index] = updated.clone();

        self.write_all(users).await?;

        log::info!("Session {}: updated user {}", self.id, updated.id);

        Ok(updated)
    }

    async fn read_all(&self) -> Result<Vec<UserRecord>, SessionError> {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || store.read_all());

        // the blocking read keeps running if we give up on it; its result
        // is simply dropped
        let joined = tokio::time::timeout(self.read_timeout, task)
            .await
            .map_err(|_| SessionError::Timeout(self.read_timeout))?;

        joined
            .map_err(|e| SessionError::TaskFailed(e.to_string()))?
            .map_err(SessionError::StoreRead)
    }

    async fn write_all(
        &self,
        users: Vec<UserRecord>,
    ) -> Result<(), SessionError> {
        let store = self.store.clone();

        tokio::task::spawn_blocking(move || store.write_all(&users))
            .await
            .map_err(|e| SessionError::TaskFailed(e.to_string()))?
            .map_err(SessionError::StoreWrite)
    }
}
