//! Session protocol messages.
//!
//! Every message is one JSON object `{ "type": ..., "payload": ... }` sent as
//! a single websocket text frame. Requests flow client to server, responses
//! flow back; the server never sends anything unsolicited.
//!
//! Parsing is split in two stages on the server side. The envelope is read
//! first; a broken envelope is a [ProtocolError] and gets no reply. The
//! payload is then interpreted by the request handler, which answers any
//! payload problem with an `error` response.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::{self, CoerceError};
use crate::record::{UserID, UserRecord};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("Message is not a JSON object")]
    NotAnObject,
    #[error("Message has no type")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

// =============================================================================

/// Requests recognized by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    GetUsers,
    UpdateUser,
}

impl FromStr for RequestKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "getUsers" => Ok(Self::GetUsers),
            "updateUser" => Ok(Self::UpdateUser),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// A request whose envelope has been validated but whose payload has not.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub kind: RequestKind,
    pub payload: Value,
}

impl RequestEnvelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;

        let Value::Object(mut map) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let kind = match map.get("type") {
            Some(Value::String(t)) => t.parse()?,
            _ => return Err(ProtocolError::MissingType),
        };

        let payload = map.remove("payload").unwrap_or(Value::Null);

        Ok(Self { kind, payload })
    }
}

// =============================================================================

/// Typed requests, as produced by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    GetUsers(GetUsersRequest),
    UpdateUser(UpdateUserRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUsersRequest {
    pub start: u64,
}

/// A full replacement of the editable fields of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub id: UserID,
    pub full_name: String,
    pub post: String,
    pub address: String,
    pub age: u32,
    pub salary: f64,
    pub has_tax_id: bool,
    pub tax_id: Option<i64>,
}

impl ClientMessage {
    pub fn to_text(&self) -> String {
        // plain data with string keys always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

// =============================================================================

/// Responses from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// One page of records. Empty means there are no more pages.
    Users(Vec<UserRecord>),
    /// The record as it was persisted.
    UserUpdated(UserRecord),
    /// Human readable failure reason. The connection stays open.
    Error(String),
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Value = serde_json::from_str(text)?;

        match envelope.get("type") {
            Some(Value::String(t)) => match t.as_str() {
                "users" | "userUpdated" | "error" => {
                    Ok(serde_json::from_value(envelope)?)
                }
                other => Err(ProtocolError::UnknownType(other.to_string())),
            },
            Some(_) | None => Err(ProtocolError::MissingType),
        }
    }
}

// =============================================================================

/// Read the page index out of a `getUsers` payload.
///
/// Accepts anything `parseInt` would turn into a non-negative integer.
pub fn parse_start(payload: &Value) -> Option<u64> {
    let start = payload.get("start")?;
    let start = coerce::leading_integer(start)?;
    u64::try_from(start).ok()
}

/// Editable fields pulled from an `updateUser` payload.
///
/// Fields that were not sent are [None] and keep their stored value when
/// applied. `tax_id` is kept raw, as it is only interpreted when the merged
/// record says it has a tax id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub id: UserID,
    pub full_name: Option<String>,
    pub post: Option<String>,
    pub address: Option<String>,
    pub age: Option<u32>,
    pub salary: Option<f64>,
    pub has_tax_id: Option<bool>,
    pub tax_id: Option<Value>,
}

impl UserPatch {
    pub fn from_payload(payload: &Value) -> Result<Self, CoerceError> {
        let field = |name: &str| match payload.get(name) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        };

        let id = payload
            .get("id")
            .ok_or_else(|| CoerceError::MissingField("id".into()))?;
        let id = coerce::leading_integer(id)
            .and_then(|i| UserID::try_from(i).ok())
            .ok_or_else(|| CoerceError::NotANumber {
                field: "id".into(),
                found: coerce::get_value_type(id),
            })?;

        Ok(Self {
            id,
            full_name: coerce::optional_string(
                "fullName",
                field("fullName").or_else(|| field("FIO")),
            )?,
            post: coerce::optional_string("post", field("post"))?,
            address: coerce::optional_string("address", field("address"))?,
            age: field("age")
                .map(|v| coerce::to_unsigned("age", v))
                .transpose()?,
            salary: field("salary")
                .map(|v| coerce::to_number("salary", v))
                .transpose()?,
            has_tax_id: payload
                .get("hasTaxId")
                .or_else(|| payload.get("haveINN"))
                .map(coerce::truthy),
            tax_id: field("taxId").or_else(|| field("INN")).cloned(),
        })
    }

    /// Merge this patch over an existing record, keeping its id.
    pub fn apply(&self, existing: &UserRecord) -> Result<UserRecord, CoerceError> {
        let has_tax_id = self
            .has_tax_id
            .unwrap_or(existing.has_tax_id == Some(true));

        let tax_id = if has_tax_id {
            match &self.tax_id {
                Some(v) => Some(coerce::to_integer("taxId", v)?),
                None => Some(
                    existing
                        .tax_id
                        .ok_or_else(|| CoerceError::MissingField("taxId".into()))?,
                ),
            }
        } else {
            None
        };

        Ok(UserRecord {
            id: existing.id,
            full_name: self
                .full_name
                .clone()
                .unwrap_or_else(|| existing.full_name.clone()),
            post: self.post.clone().unwrap_or_else(|| existing.post.clone()),
            address: self
                .address
                .clone()
                .unwrap_or_else(|| existing.address.clone()),
            age: self.age.unwrap_or(existing.age),
            salary: self.salary.unwrap_or(existing.salary),
            has_tax_id: Some(has_tax_id),
            tax_id,
        })
    }
}
