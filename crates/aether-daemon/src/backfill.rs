//! One-shot session backfill.
//!
//! After startup, sessions that are active or idle in the registry but have
//! an empty event buffer get their message history fetched from the managed
//! server. Each message part is wrapped in the same `{part: ...}` envelope
//! used by live events, so tool-call extraction downstream cannot tell
//! backfilled events from live ones. Best-effort and time-bounded.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::events::EventBuffer;
use crate::events::buffer::SessionEvent;
use crate::registry::{SessionRegistry, SessionStatus};

/// Whole-backfill deadline.
const BACKFILL_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

pub async fn run(registry: Arc<SessionRegistry>, events: Arc<EventBuffer>, server_url: String) {
    match tokio::time::timeout(
        BACKFILL_TIMEOUT,
        backfill_all(&registry, &events, &server_url),
    )
    .await
    {
        Ok(filled) => {
            info!(event = "daemon.backfill.completed", sessions = filled);
        }
        Err(_) => {
            warn!(
                event = "daemon.backfill.timed_out",
                deadline_secs = BACKFILL_TIMEOUT.as_secs(),
            );
        }
    }
}

async fn backfill_all(
    registry: &SessionRegistry,
    events: &EventBuffer,
    server_url: &str,
) -> usize {
    let records = match registry.list().await {
        Ok(records) => records,
        Err(e) => {
            warn!(event = "daemon.backfill.registry_list_failed", error = %e);
            return 0;
        }
    };

    let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(event = "daemon.backfill.client_build_failed", error = %e);
            return 0;
        }
    };

    let mut filled = 0;
    for record in records {
        if !matches!(record.status, SessionStatus::Active | SessionStatus::Idle) {
            continue;
        }
        if !events.is_empty(&record.session_id) {
            continue;
        }
        match fetch_session_history(&client, events, server_url, &record.session_id).await {
            Ok(count) if count > 0 => {
                debug!(
                    event = "daemon.backfill.session_filled",
                    session_id = %record.session_id,
                    events = count,
                );
                filled += 1;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(
                    event = "daemon.backfill.session_failed",
                    session_id = %record.session_id,
                    error = %e,
                );
            }
        }
    }
    filled
}

/// Fetch one session's messages and push each part as an event.
async fn fetch_session_history(
    client: &reqwest::Client,
    events: &EventBuffer,
    server_url: &str,
    session_id: &str,
) -> Result<usize, String> {
    let url = format!(
        "{}/session/{}/message",
        server_url.trim_end_matches('/'),
        session_id
    );
    let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let messages: Vec<MessageEnvelope> = response.json().await.map_err(|e| e.to_string())?;

    let mut pushed = 0;
    for message in messages {
        for part in message.parts {
            // Live plugin events stamp wall-clock millis; mirror that from
            // the part's own clock so events_since stays coherent
            let timestamp = part["time"]["start"].as_i64().unwrap_or(0);
            events.push(SessionEvent {
                event_type: "message.part.updated".to_string(),
                session_id: session_id.to_string(),
                timestamp,
                data: serde_json::json!({ "part": part }),
            });
            pushed += 1;
        }
    }
    Ok(pushed)
}
