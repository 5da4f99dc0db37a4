//! Event router: one registered handler per event kind, fire-and-forget
//! dispatch.
//!
//! The router is a pure demultiplexer. Each dispatched event's decode and
//! handler body run in their own detached task so the listener acknowledges
//! the platform without waiting on command execution or outbound sends.
//! Failures inside a task are logged there and never reach the router.

use crate::events::{EventKind, InboundEvent};
use crate::lark::DeliveryError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Business logic for one event kind. Errors are logged by the dispatch
/// task; they never propagate further.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> Result<(), DeliveryError>;
}

/// Dispatch table from event kind to handler. Handlers are registered once
/// at start-up; the table is immutable afterwards.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for an event kind. Exactly one handler per kind;
    /// re-registering replaces the previous one.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// True when a handler is registered for the kind.
    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route one raw callback mapping. Unrecognized types are logged and
    /// discarded; recognized ones are decoded and handled in a spawned task.
    /// Always returns immediately so the caller can acknowledge the platform.
    pub fn dispatch(&self, request_id: &str, raw: Value) {
        let Some(typ) = raw.get("type").and_then(Value::as_str) else {
            log::warn!("event without a type field (request {}), dropping", request_id);
            return;
        };
        let Some(kind) = EventKind::from_type(typ) else {
            log::debug!("unrecognized event type {} (request {}), dropping", typ, request_id);
            return;
        };
        let Some(handler) = self.handlers.get(&kind) else {
            log::debug!("no handler registered for {} (request {})", typ, request_id);
            return;
        };
        let handler = handler.clone();
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            let event = match InboundEvent::decode_kind(kind, &raw) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("dropping event (request {}): {}", request_id, e);
                    return;
                }
            };
            if let Err(e) = handler.handle(event).await {
                log::warn!(
                    "handling {} event failed (request {}): {}",
                    kind.as_str(),
                    request_id,
                    e
                );
            }
        });
    }
}
