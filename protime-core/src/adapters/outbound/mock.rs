//! Scriptable stand-ins for the outbound ports.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::domain::{
    ports::outbound::{
        Clock, Method, Notice, Notifier, RemoteRequest, RemoteResponse, Transport,
    },
    TransportError,
};

/// Transport answering from a table of scripted responses.
///
/// Requests are matched on method and [`RemoteRequest::target`]. Unscripted
/// requests get a 404. Every request is recorded, in order.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), RemoteResponse>>,
    calls: Mutex<Vec<RemoteRequest>>,
    offline: AtomicBool,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every call fails as if the network were down.
    pub fn offline() -> Self {
        let transport = Self::default();
        transport.set_offline(true);
        transport
    }

    /// Answer `method target` with `response`.
    pub fn with_response(self, method: Method, target: &str, response: RemoteResponse) -> Self {
        self.script(method, target, response);
        self
    }

    /// Answer `method target` with a 200 carrying `body`.
    pub fn with_ok(self, method: Method, target: &str, body: Value) -> Self {
        self.with_response(method, target, RemoteResponse::ok(body))
    }

    /// Delay every answer, to simulate a slow network.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn script(&self, method: Method, target: &str, response: RemoteResponse) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((method, target.to_string()), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// All requests sent so far.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All requests sent so far, as `METHOD target` strings.
    pub fn call_targets(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// Requests sent to `path` (ignoring query), in order.
    pub fn calls_to(&self, method: Method, path: &str) -> Vec<RemoteRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Request("connection refused".to_string()));
        }

        let response = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(request.method, request.target()))
            .cloned()
            .unwrap_or_else(|| RemoteResponse::new(404));
        Ok(response)
    }
}

/// Notifier that keeps every notice for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[tokio::test]
    async fn scripted_and_unscripted_routes() {
        let transport = MockTransport::new().with_ok(Method::Get, "/tasks?status=Done", json!([]));

        let hit = transport
            .send(&RemoteRequest::get("/tasks").with_query("status", "Done"))
            .await
            .unwrap();
        assert!(hit.is_success());

        let miss = transport.send(&RemoteRequest::get("/tasks")).await.unwrap();
        assert_eq!(miss.status, 404);
        assert_eq!(
            transport.call_targets(),
            vec!["GET /tasks?status=Done", "GET /tasks"]
        );
    }

    #[tokio::test]
    async fn offline_transport_errors_but_records() {
        let transport = MockTransport::offline();
        let err = transport
            .send(&RemoteRequest::post("/time-entries", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
        assert_eq!(transport.calls_to(Method::Post, "/time-entries").len(), 1);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2025-03-04 09:00 UTC));
        clock.advance(time::Duration::seconds(65));
        assert_eq!(clock.now(), datetime!(2025-03-04 09:01:05 UTC));
    }
}
