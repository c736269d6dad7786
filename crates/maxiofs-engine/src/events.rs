//! Webhook event delivery.
//!
//! `ObjectCreated`/`ObjectRemoved` events are enqueued durably in the
//! mutation batch (`evt:{ts}:{seq}`) and fanned out as HTTP POSTs in
//! the AWS S3 event envelope shape. Delivery retries up to five times
//! with backoff; after that the event is dropped and counted.

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bucket::meta_err;
use crate::types::EventRecord;
use crate::Engine;
use maxiofs_common::{now_secs, Result};
use maxiofs_meta::keys;

/// Give up after this many delivery attempts
const MAX_ATTEMPTS: u32 = 5;

/// Delivers queued events to their webhooks.
pub struct EventWorker {
    engine: Arc<Engine>,
    http: reqwest::Client,
    interval: Duration,
}

impl EventWorker {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        Self {
            engine,
            http: reqwest::Client::new(),
            interval,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "event worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("event worker stopping");
                        return;
                    }
                }
            }
            if let Err(e) = self.drain_once().await {
                warn!(error = %e, "event delivery cycle failed");
            }
        }
    }

    /// One pass over the event queue.
    pub async fn drain_once(&self) -> Result<()> {
        let now = now_secs();
        let batch = self
            .engine
            .meta
            .scan(keys::EVENT_ALL, None, 128)
            .map_err(meta_err)?;

        for entry in batch {
            let mut event: EventRecord = entry.decode().map_err(meta_err)?;
            if event.next_attempt_at > now {
                continue;
            }

            match self.deliver(&event).await {
                Ok(()) => {
                    self.engine.meta.delete(&entry.key).map_err(meta_err)?;
                    self.engine
                        .stats
                        .events_delivered
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(event = %event.event_name, key = %event.key, url = %event.webhook_url, "event delivered");
                }
                Err(e) => {
                    event.attempts += 1;
                    if event.attempts >= MAX_ATTEMPTS {
                        self.engine.meta.delete(&entry.key).map_err(meta_err)?;
                        self.engine
                            .stats
                            .events_dropped
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(event = %event.event_name, key = %event.key, error = %e, "event dropped after {MAX_ATTEMPTS} attempts");
                    } else {
                        event.next_attempt_at = now + (1u64 << event.attempts.min(8));
                        self.engine
                            .meta
                            .put_json(&entry.key, &event)
                            .map_err(meta_err)?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn deliver(&self, event: &EventRecord) -> Result<()> {
        let payload = event_envelope(event);
        let resp = self
            .http
            .post(&event.webhook_url)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| maxiofs_common::Error::ConnectionFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(maxiofs_common::Error::ConnectionFailed(format!(
                "webhook returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// AWS S3 event envelope shape.
fn event_envelope(event: &EventRecord) -> serde_json::Value {
    let time = chrono::DateTime::<chrono::Utc>::from_timestamp(event.created_at as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "maxiofs:s3",
            "eventTime": time,
            "eventName": event.event_name,
            "s3": {
                "s3SchemaVersion": "1.0",
                "bucket": {
                    "name": event.bucket,
                    "arn": format!("arn:aws:s3:::{}", event.bucket),
                },
                "object": {
                    "key": event.key,
                    "size": event.size,
                    "eTag": event.etag,
                    "versionId": event.version_id,
                }
            }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let event = EventRecord {
            event_name: "s3:ObjectCreated:Put".into(),
            bucket: "b".into(),
            key: "k.txt".into(),
            version_id: "v1".into(),
            size: 42,
            etag: "abc".into(),
            webhook_url: "http://hook".into(),
            created_at: 1_700_000_000,
            attempts: 0,
            next_attempt_at: 0,
        };
        let env = event_envelope(&event);
        let record = &env["Records"][0];
        assert_eq!(record["eventName"], "s3:ObjectCreated:Put");
        assert_eq!(record["s3"]["bucket"]["name"], "b");
        assert_eq!(record["s3"]["object"]["size"], 42);
        assert_eq!(record["s3"]["object"]["versionId"], "v1");
    }
}
