//! Response record: the outcome of one processing attempt.
//!
//! Responses are append-only and correlated to their request by foreign
//! key. A request accumulates one row per attempt; the last successful
//! row is the authoritative result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::ids::{RequestId, ResponseId};

/// Semantic outcome classifier (not a transport code).
///
/// Persisted as an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    TransientFailure,
    PermanentFailure,
}

impl StatusCode {
    pub fn as_code(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::TransientFailure => 1,
            StatusCode::PermanentFailure => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Success),
            1 => Some(StatusCode::TransientFailure),
            2 => Some(StatusCode::PermanentFailure),
            _ => None,
        }
    }
}

/// The body of a response: exactly one of result or error.
///
/// The row layout stores these as two nullable columns; the enum makes
/// the exactly-one invariant unrepresentable to violate in memory, and
/// the row conversion enforces it at the serialization boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(serde_json::Value),
    Error(String),
}

/// A recorded outcome, immutable after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ResponseRow", into = "ResponseRow")]
pub struct Response {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub body: ResponseBody,
    pub status_code: StatusCode,
    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::Success
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.body {
            ResponseBody::Result(v) => Some(v),
            ResponseBody::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Result(_) => None,
            ResponseBody::Error(e) => Some(e),
        }
    }
}

/// A response waiting to be recorded; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub request_id: RequestId,
    pub body: ResponseBody,
    pub status_code: StatusCode,
}

impl NewResponse {
    pub fn success(request_id: RequestId, result: serde_json::Value) -> Self {
        Self {
            request_id,
            body: ResponseBody::Result(result),
            status_code: StatusCode::Success,
        }
    }

    pub fn failure(request_id: RequestId, error: impl Into<String>, code: StatusCode) -> Self {
        Self {
            request_id,
            body: ResponseBody::Error(error.into()),
            status_code: code,
        }
    }
}

/// Persisted row shape: `response_data` and `error_message` are nullable
/// columns, exactly one of which is populated.
#[derive(Debug, Serialize, Deserialize)]
struct ResponseRow {
    response_id: ResponseId,
    request_id: RequestId,
    response_data: Option<serde_json::Value>,
    status_code: i32,
    error_message: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<ResponseRow> for Response {
    type Error = CourierError;

    fn try_from(row: ResponseRow) -> Result<Self, CourierError> {
        let body = match (row.response_data, row.error_message) {
            (Some(data), None) => ResponseBody::Result(data),
            (None, Some(err)) => ResponseBody::Error(err),
            (Some(_), Some(_)) => {
                return Err(CourierError::Validation(format!(
                    "response row {} has both result and error",
                    row.response_id
                )));
            }
            (None, None) => {
                return Err(CourierError::Validation(format!(
                    "response row {} has neither result nor error",
                    row.response_id
                )));
            }
        };
        let status_code = StatusCode::from_code(row.status_code).ok_or_else(|| {
            CourierError::Validation(format!("unknown status code {}", row.status_code))
        })?;
        Ok(Response {
            id: row.response_id,
            request_id: row.request_id,
            body,
            status_code,
            created_at: row.timestamp,
        })
    }
}

impl From<Response> for ResponseRow {
    fn from(resp: Response) -> Self {
        let (response_data, error_message) = match resp.body {
            ResponseBody::Result(v) => (Some(v), None),
            ResponseBody::Error(e) => (None, Some(e)),
        };
        Self {
            response_id: resp.id,
            request_id: resp.request_id,
            response_data,
            status_code: resp.status_code.as_code(),
            error_message,
            timestamp: resp.created_at,
        }
    }
}
