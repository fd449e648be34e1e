// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command/Query Dispatch Registry
//!
//! Routes typed payloads (`{type, ...fields}`) to exactly one registered
//! handler. The handler table is an explicit registration map built at
//! startup; there is no reflection or metadata scanning. Registration
//! collisions fail at registration time, unknown tags fail at dispatch
//! time, and both fail loudly.
//!
//! Handlers may dispatch further commands from within their own execution
//! (composition). No table lock is held across a handler invocation, so
//! reentrant dispatch cannot deadlock.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A typed command or query: its dispatch tag plus the remaining fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(flatten)]
    pub data: Value,
}

impl CommandPayload {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }

    /// Deserialize the payload fields into a concrete command type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| DispatchError::MalformedPayload(self.tag.clone(), e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Programmer error: two handlers registered for one tag. Raised at
    /// registration time, never at dispatch time.
    #[error("Duplicate handler registered for '{0}'")]
    DuplicateHandler(String),

    /// Programmer error: nothing handles this tag. Never a silent no-op.
    #[error("No handler registered for '{0}'")]
    UnregisteredHandler(String),

    #[error("Malformed payload for '{0}': {1}")]
    MalformedPayload(String, String),

    #[error("Handler for '{0}' failed: {1}")]
    Handler(String, #[source] anyhow::Error),
}

/// A registered command/query handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        payload: CommandPayload,
        registry: &DispatchRegistry,
    ) -> anyhow::Result<Value>;
}

/// Tag -> handler table.
pub struct DispatchRegistry {
    handlers: DashMap<String, Arc<dyn CommandHandler>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for `tag`. Exactly one handler per tag.
    pub fn register(
        &self,
        tag: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), DispatchError> {
        let tag = tag.into();
        match self.handlers.entry(tag.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DispatchError::DuplicateHandler(tag))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!(tag = %tag, "Registered command handler");
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Route a payload to its handler.
    pub async fn dispatch(&self, payload: CommandPayload) -> Result<Value, DispatchError> {
        // Clone the Arc out of the map so no shard lock is held while the
        // handler runs; a handler dispatching reentrantly sees a free table.
        let handler = self
            .handlers
            .get(&payload.tag)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::UnregisteredHandler(payload.tag.clone()))?;

        let tag = payload.tag.clone();
        handler
            .handle(payload, self)
            .await
            .map_err(|e| DispatchError::Handler(tag, e))
    }

    pub fn registered_tags(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
