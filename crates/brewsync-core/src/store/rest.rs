//! Request/response store over a PostgREST-compatible table.
//!
//! Rows look like `{"id": "<collection>", "payload": "<text>"}`. The API has no
//! change feed, so subscriptions poll and fire whenever the value differs
//! from the last one observed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ChangeCallback, CredentialSource, RemoteStore, SubscriptionHandle};
use crate::models::{CollectionName, Payload};
use crate::report::{ErrorReporter, SyncFailure};
use crate::util::{compact_text, normalize_base_url};
use crate::{Error, Result};

#[derive(Clone)]
pub struct RestStore {
    table_url: String,
    anon_key: String,
    client: Client,
    poll_interval: Duration,
    credentials: Option<Arc<dyn CredentialSource>>,
    reporter: ErrorReporter,
}

#[derive(Debug, Serialize)]
struct CollectionRow<'a> {
    id: &'a str,
    payload: &'a str,
}

#[derive(Debug, Deserialize)]
struct PayloadRow {
    payload: Option<String>,
}

impl RestStore {
    pub fn new(
        url: &str,
        anon_key: &str,
        table: &str,
        poll_interval: Duration,
        timeout: Duration,
        credentials: Option<Arc<dyn CredentialSource>>,
        reporter: ErrorReporter,
    ) -> Result<Self> {
        let base_url = normalize_base_url(url, "store url").map_err(Error::Configuration)?;
        let table = table.trim().trim_matches('/');
        if table.is_empty() {
            return Err(Error::Configuration(
                "store table must not be empty".to_string(),
            ));
        }
        let base_url = base_url.trim_end_matches("/rest/v1");

        Ok(Self {
            table_url: format!("{base_url}/rest/v1/{table}"),
            anon_key: anon_key.trim().to_string(),
            client: Client::builder().timeout(timeout).build()?,
            poll_interval,
            credentials,
            reporter,
        })
    }

    /// Attach the anon key plus the user's bearer token when signed in.
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .credentials
            .as_ref()
            .and_then(|credentials| credentials.access_token())
            .unwrap_or_else(|| self.anon_key.clone());
        request.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    async fn fetch(&self, name: CollectionName) -> Result<Payload> {
        let request = self.authorized(
            self.client
                .get(&self.table_url)
                .query(&[
                    ("id", format!("eq.{}", name.as_str())),
                    ("select", "payload".to_string()),
                ])
                .header("Accept", "application/json"),
        );
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(response_error(response).await));
        }

        let rows = response.json::<Vec<PayloadRow>>().await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.payload)
            .map(Payload::from)
            .ok_or(Error::NotFound(name))
    }

    async fn upsert(&self, name: CollectionName, payload: &Payload) -> Result<()> {
        let rows = [CollectionRow {
            id: name.as_str(),
            payload: payload.as_str(),
        }];
        let request = self.authorized(
            self.client
                .post(&self.table_url)
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&rows),
        );
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(response_error(response).await));
        }
        Ok(())
    }
}

/// Last value a polling subscription observed.
///
/// A missing row counts as the empty payload, so a collection deleted
/// remotely reaches the UI as `""`.
#[derive(Debug, Default)]
struct ChangeDetector {
    last_seen: Option<Payload>,
}

impl ChangeDetector {
    /// Record one fetch. Returns the payload when it differs from the
    /// previous observation; failures leave the last observation in place.
    fn observe(&mut self, fetched: Result<Payload>) -> Result<Option<Payload>> {
        let payload = match fetched {
            Ok(payload) => payload,
            Err(Error::NotFound(_)) => Payload::empty(),
            Err(error) => return Err(error),
        };
        if self.last_seen.as_ref() == Some(&payload) {
            return Ok(None);
        }
        self.last_seen = Some(payload.clone());
        Ok(Some(payload))
    }
}

/// Fetch every `period` and hand changed values to `on_change`.
async fn poll_changes<F, Fut>(
    name: CollectionName,
    period: Duration,
    mut detector: ChangeDetector,
    mut fetch: F,
    on_change: ChangeCallback,
    reporter: &ErrorReporter,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Payload>>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;
        match detector.observe(fetch().await) {
            Ok(Some(payload)) => on_change(payload),
            Ok(None) => {}
            Err(error) => report_poll_failure(reporter, name, &error),
        }
    }
}

fn report_poll_failure(reporter: &ErrorReporter, name: CollectionName, error: &Error) {
    reporter.report(SyncFailure::Subscription {
        collection: name,
        reason: error.to_string(),
    });
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn read(&self, name: CollectionName) -> Result<Payload> {
        self.fetch(name).await
    }

    async fn write(&self, name: CollectionName, payload: &Payload) -> Result<()> {
        self.upsert(name, payload)
            .await
            .map_err(|error| Error::write_failed(name, error))
    }

    async fn subscribe(
        &self,
        name: CollectionName,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle> {
        // The first observation is the baseline: anything that changes after
        // this call returns fires, even before the first poll tick.
        let mut detector = ChangeDetector::default();
        if let Err(error) = detector.observe(self.fetch(name).await) {
            report_poll_failure(&self.reporter, name, &error);
        }

        let store = self.clone();
        let task = tokio::spawn(async move {
            poll_changes(
                name,
                store.poll_interval,
                detector,
                || store.fetch(name),
                on_change,
                &store.reporter,
            )
            .await;
        });
        Ok(SubscriptionHandle::from_task(name, task))
    }

    fn kind(&self) -> &'static str {
        "rest"
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    hint: Option<String>,
}

async fn response_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    parse_api_error(status, &body)
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.hint) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;

    fn store(url: &str, table: &str) -> Result<RestStore> {
        RestStore::new(
            url,
            "anon",
            table,
            Duration::from_secs(5),
            Duration::from_secs(1),
            None,
            ErrorReporter::log_only(),
        )
    }

    #[test]
    fn table_url_is_built_from_project_url() {
        let rest = store("https://demo.supabase.co/", "collections").unwrap();
        assert_eq!(rest.table_url, "https://demo.supabase.co/rest/v1/collections");

        let rest = store("https://demo.supabase.co/rest/v1", "/brewery_state/").unwrap();
        assert_eq!(rest.table_url, "https://demo.supabase.co/rest/v1/brewery_state");
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(store("demo.supabase.co", "collections").is_err());
        assert!(store("https://demo.supabase.co", " / ").is_err());
    }

    #[test]
    fn upsert_row_serializes_payload_as_text() {
        let row = CollectionRow {
            id: CollectionName::Brews.as_str(),
            payload: r#"{"a":1}"#,
        };
        assert_eq!(
            serde_json::to_string(&[row]).unwrap(),
            r#"[{"id":"brews","payload":"{\"a\":1}"}]"#
        );
    }

    #[test]
    fn parse_api_error_uses_postgrest_message() {
        let rendered = parse_api_error(
            StatusCode::UNAUTHORIZED,
            r#"{"code":"PGRST301","message":"JWT expired","hint":null}"#,
        );
        assert_eq!(rendered, "JWT expired (401)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[test]
    fn detector_reports_only_changes() {
        let mut detector = ChangeDetector::default();

        assert_eq!(
            detector.observe(Ok(Payload::from("[1]"))).unwrap(),
            Some(Payload::from("[1]"))
        );
        assert_eq!(detector.observe(Ok(Payload::from("[1]"))).unwrap(), None);
        assert!(detector
            .observe(Err(Error::Api("upstream timeout (504)".to_string())))
            .is_err());
        assert_eq!(detector.observe(Ok(Payload::from("[1]"))).unwrap(), None);
        assert_eq!(
            detector
                .observe(Err(Error::NotFound(CollectionName::Brews)))
                .unwrap(),
            Some(Payload::empty())
        );
        assert_eq!(
            detector
                .observe(Err(Error::NotFound(CollectionName::Brews)))
                .unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn polling_fires_once_per_change_and_reports_failures() {
        let mut detector = ChangeDetector::default();
        detector.observe(Ok(Payload::from("v0"))).unwrap();
        let script = Arc::new(Mutex::new(VecDeque::from([
            Ok(Payload::from("v0")),
            Ok(Payload::from("v1")),
            Ok(Payload::from("v1")),
            Err(Error::Api("JWT expired (401)".to_string())),
            Ok(Payload::from("v2")),
        ])));
        let (changes_tx, mut changes) = mpsc::unbounded_channel();
        let on_change: ChangeCallback = Arc::new(move |payload| {
            let _ = changes_tx.send(payload);
        });
        let (reporter, mut failures) = ErrorReporter::channel();

        let poller = tokio::spawn(async move {
            let fetch = || {
                let next = script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(Payload::from("v2")));
                async move { next }
            };
            poll_changes(
                CollectionName::Brews,
                Duration::from_millis(1),
                detector,
                fetch,
                on_change,
                &reporter,
            )
            .await;
        });

        assert_eq!(changes.recv().await.unwrap(), Payload::from("v1"));
        assert!(matches!(
            failures.recv().await.unwrap(),
            SyncFailure::Subscription {
                collection: CollectionName::Brews,
                ..
            }
        ));
        assert_eq!(changes.recv().await.unwrap(), Payload::from("v2"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(changes.try_recv().is_err());
        poller.abort();
    }
}
