//! Push-capable store speaking the Firebase Realtime Database REST protocol.
//!
//! Each collection lives at `<url>/<prefix>/<collection>.json` as a JSON
//! string. Reads and writes are plain `GET`/`PUT`; subscriptions keep a
//! `text/event-stream` response open and react to `put`/`patch` events.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{ChangeCallback, CredentialSource, RemoteStore, SubscriptionHandle};
use crate::models::{CollectionName, Payload};
use crate::report::{ErrorReporter, SyncFailure};
use crate::util::{compact_text, normalize_base_url};
use crate::{Error, Result};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RealtimeStore {
    base_url: String,
    prefix: Option<String>,
    client: Client,
    stream_client: Client,
    credentials: Option<Arc<dyn CredentialSource>>,
    reporter: ErrorReporter,
}

/// Data line of a `put`/`patch` event.
#[derive(Debug, Deserialize)]
struct StreamUpdate {
    path: String,
    data: Value,
}

impl RealtimeStore {
    pub fn new(
        url: &str,
        prefix: Option<&str>,
        timeout: Duration,
        credentials: Option<Arc<dyn CredentialSource>>,
        reporter: ErrorReporter,
    ) -> Result<Self> {
        let base_url = normalize_base_url(url, "store url").map_err(Error::Configuration)?;
        let prefix = prefix
            .map(|prefix| prefix.trim().trim_matches('/').to_string())
            .filter(|prefix| !prefix.is_empty());

        Ok(Self {
            base_url,
            prefix,
            client: Client::builder().timeout(timeout).build()?,
            // The event stream stays open indefinitely; only connecting is bounded.
            stream_client: Client::builder().connect_timeout(timeout).build()?,
            credentials,
            reporter,
        })
    }

    fn collection_url(&self, name: CollectionName) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}/{}.json", self.base_url, prefix, name.as_str()),
            None => format!("{}/{}.json", self.base_url, name.as_str()),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self
            .credentials
            .as_ref()
            .and_then(|credentials| credentials.access_token())
        {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    async fn put(&self, name: CollectionName, payload: &Payload) -> Result<()> {
        let request = self.authorized(
            self.client
                .put(self.collection_url(name))
                .json(&Value::String(payload.as_str().to_string())),
        );
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(response_error(response).await));
        }
        Ok(())
    }

    async fn listen_forever(self, name: CollectionName, on_change: ChangeCallback) {
        reconnect_forever(
            name,
            Backoff::new(INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY),
            || self.listen(name, &on_change),
            &self.reporter,
        )
        .await;
    }

    /// Consume one event stream until the server closes it.
    async fn listen(&self, name: CollectionName, on_change: &ChangeCallback) -> Result<()> {
        let request = self.authorized(
            self.stream_client
                .get(self.collection_url(name))
                .header("Accept", "text/event-stream"),
        );
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Subscription {
                collection: name,
                reason: response_error(response).await,
            });
        }
        tracing::debug!("Listening for {} changes", name);

        let mut decoder = SseDecoder::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.feed(&chunk) {
                self.handle_event(name, event, on_change).await?;
            }
        }
        Ok(())
    }

    async fn handle_event(
        &self,
        name: CollectionName,
        event: SseEvent,
        on_change: &ChangeCallback,
    ) -> Result<()> {
        match event.event.as_str() {
            "put" | "patch" => {
                let update: StreamUpdate = serde_json::from_str(&event.data)?;
                let payload = if event.event == "put" && update.path == "/" {
                    payload_from_value(update.data).unwrap_or_default()
                } else {
                    // Partial update below the collection root: fetch the whole value.
                    match self.read(name).await {
                        Ok(payload) => payload,
                        Err(Error::NotFound(_)) => Payload::empty(),
                        Err(error) => return Err(error),
                    }
                };
                on_change(payload);
                Ok(())
            }
            "keep-alive" => Ok(()),
            "cancel" | "auth_revoked" => Err(Error::Subscription {
                collection: name,
                reason: format!("server sent {}", event.event),
            }),
            other => {
                tracing::debug!("Ignoring '{}' event for {}", other, name);
                Ok(())
            }
        }
    }
}

/// Reconnect delay that doubles after each failure and resets once a
/// stream ends cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    fn after_failure(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn after_close(&mut self) -> Duration {
        self.next = self.initial;
        self.initial
    }
}

/// Run `connect` again every time it returns, reporting each failure.
async fn reconnect_forever<F, Fut>(
    name: CollectionName,
    mut backoff: Backoff,
    mut connect: F,
    reporter: &ErrorReporter,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let delay = match connect().await {
            Ok(()) => {
                tracing::debug!("Event stream for {} closed; reconnecting", name);
                backoff.after_close()
            }
            Err(error) => {
                reporter.report(SyncFailure::Subscription {
                    collection: name,
                    reason: error.to_string(),
                });
                backoff.after_failure()
            }
        };
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl RemoteStore for RealtimeStore {
    async fn read(&self, name: CollectionName) -> Result<Payload> {
        let request = self.authorized(self.client.get(self.collection_url(name)));
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(response_error(response).await));
        }
        let value = response.json::<Value>().await?;
        payload_from_value(value).ok_or(Error::NotFound(name))
    }

    async fn write(&self, name: CollectionName, payload: &Payload) -> Result<()> {
        self.put(name, payload)
            .await
            .map_err(|error| Error::write_failed(name, error))
    }

    async fn subscribe(
        &self,
        name: CollectionName,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle> {
        let task = tokio::spawn(self.clone().listen_forever(name, on_change));
        Ok(SubscriptionHandle::from_task(name, task))
    }

    fn kind(&self) -> &'static str {
        "realtime"
    }
}

/// Stored values are JSON strings; anything else written by another client
/// is passed on in its compact JSON form. `null` means nothing is stored.
fn payload_from_value(value: Value) -> Option<Payload> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(Payload::from(text)),
        other => Some(Payload::from(other.to_string())),
    }
}

async fn response_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    parse_api_error(status, &body)
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }

    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        return format!("{} ({})", error.trim(), status.as_u16());
    }
    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split events (and UTF-8 sequences) anywhere; complete events
/// are returned as soon as their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|window| window == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() && event == "message" {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}
