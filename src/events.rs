//! # Progress Events
//!
//! Generation, deployment and log streaming are long-running operations that
//! report progress incrementally. Each report is a named [`Event`] carrying a
//! small JSON payload, delivered over a channel created by [`channel()`].
//!
//! ## Event Names
//!
//! | Operation | Events |
//! |-----------|--------|
//! | Generation | `status`, `phase`, `file`, `progress`, `complete`, `error` |
//! | Deployment | `status`, `build-log`, `complete`, `error` |
//! | Log streaming | `log` |
//!
//! Consumers must ignore names they do not recognise.
//!
//! ## Usage
//!
//! ```rust
//! use forgekit::events::{self, EventKind};
//! use serde_json::json;
//!
//! let (sender, mut receiver) = events::channel();
//! sender.emit(EventKind::Phase, json!({ "phase": "scaffold" }));
//! drop(sender);
//!
//! let frames: String = receiver.drain().iter().map(|e| e.to_sse_frame()).collect();
//! assert!(frames.starts_with("event: phase\ndata: "));
//! ```
//!
//! ## SSE Format
//!
//! When relayed to a browser, events are framed as Server-Sent Events:
//!
//! ```text
//! event: progress
//! data: {"percent":15,"filesGenerated":6}
//!
//! ```

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Closed set of event names emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Status,
    Phase,
    File,
    Progress,
    Complete,
    Error,
    BuildLog,
    Log,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Phase => "phase",
            EventKind::File => "file",
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::BuildLog => "build-log",
            EventKind::Log => "log",
        }
    }
}

/// One named progress message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: Value,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Render as a `text/event-stream` frame.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind.as_str(), self.data)
    }
}

/// Sender side of an event channel.
///
/// Clone this to report from several tasks. Sending never fails: once the
/// receiver is gone, events are dropped.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSender {
    /// A sender whose events go nowhere.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, kind: EventKind, data: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Event::new(kind, data));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Receiver side of an event channel.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take every event queued so far without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Create a new event channel returning the sender and receiver halves.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx: Some(tx) }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sse_frame_format() {
        let event = Event::new(EventKind::BuildLog, json!({ "line": "Step 1/6" }));
        assert_eq!(
            event.to_sse_frame(),
            "event: build-log\ndata: {\"line\":\"Step 1/6\"}\n\n"
        );
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut rx) = channel();
        tx.emit(EventKind::Phase, json!({ "phase": "models" }));
        tx.emit(EventKind::Progress, json!({ "percent": 35 }));
        let names: Vec<_> = rx.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["phase", "progress"]);
    }

    #[test]
    fn test_send_after_receiver_dropped_is_ignored() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.is_closed());
        tx.emit(EventKind::Status, json!({}));
    }

    #[test]
    fn test_discard_sender() {
        let tx = EventSender::discard();
        assert!(tx.is_closed());
        tx.emit(EventKind::Log, json!({ "line": "ignored" }));
    }
}
