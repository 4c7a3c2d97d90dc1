//! Topic handlers: the code that actually processes a payload.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CourierError, StatusCode, Topic};

/// How a processing failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt (network flake, upstream busy, ...).
    Transient,

    /// Retrying cannot help (malformed payload, business rejection).
    Permanent,
}

/// A payload execution failure.
///
/// This is data, not a fault: the worker records it as a response row
/// and decides between retry and finalize. It never propagates past the
/// worker loop.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            FailureKind::Transient => StatusCode::TransientFailure,
            FailureKind::Permanent => StatusCode::PermanentFailure,
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProcessingError {}

/// A handler for one topic.
///
/// Takes the opaque payload document and produces either a result
/// document or a classified failure. Decoding the payload is the
/// handler's business.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, payload: &serde_json::Value) -> Result<serde_json::Value, ProcessingError>;
}

/// Registry of handlers (topic -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable).
/// This avoids locks and keeps dispatch a plain map lookup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Topic, Arc<dyn TopicHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a topic. Registering the same topic twice
    /// is an error.
    pub fn register(
        &mut self,
        topic: Topic,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), CourierError> {
        if self.handlers.contains_key(&topic) {
            return Err(CourierError::DuplicateHandler(topic));
        }
        self.handlers.insert(topic, handler);
        Ok(())
    }

    pub fn get(&self, topic: &Topic) -> Option<&Arc<dyn TopicHandler>> {
        self.handlers.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
