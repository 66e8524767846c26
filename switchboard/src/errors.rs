//! Error reporting for routed events.
//!
//! Destinations declare how their failures are surfaced (`sentry`, `discord`).
//! Both side effects are rate limited: error tracking by one process-wide
//! bucket, channel notices per channel.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::engine::events::EventContainer;
use crate::engine::rate_limiter::{RateLimiter, TokenBucket};
use crate::routing::rules::ErrorHandler;
use crate::state::error::StateError;

/// One error as handed to an error tracker.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub service: String,
    pub error: String,
    pub backtrace: String,
    /// Message context (ids, author, content) when the event was a message.
    pub context: BTreeMap<String, String>,
}

/// External error tracker.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn capture(&self, report: ErrorReport);
}

/// A request to tell a channel that handling its message failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub channel_id: String,
    pub content: String,
}

/// What `report` did with an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub logged: bool,
    pub captured: bool,
    pub notified: bool,
}

pub struct ErrorReporter {
    sink: Option<Arc<dyn ErrorSink>>,
    notices: Option<mpsc::Sender<ErrorNotice>>,
    global: TokenBucket,
    per_channel: RateLimiter,
}

/// Cache misses and mismatches are routine and never reported.
pub fn is_expected(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StateError>())
        .is_some_and(StateError::is_expected)
}

impl ErrorReporter {
    pub fn new(global_per_second: f64, channel_per_second: f64) -> Self {
        Self {
            sink: None,
            notices: None,
            global: TokenBucket::per_second(global_per_second),
            per_channel: RateLimiter::per_second(channel_per_second),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Queue channel notices on `sender` for the transport to post.
    pub fn with_notices(mut self, sender: mpsc::Sender<ErrorNotice>) -> Self {
        self.notices = Some(sender);
        self
    }

    pub async fn report(
        &self,
        service: &str,
        err: &anyhow::Error,
        handlers: &[ErrorHandler],
        event: Option<&EventContainer>,
    ) -> ReportOutcome {
        let mut outcome = ReportOutcome::default();
        if is_expected(err) {
            return outcome;
        }

        let message = event.and_then(|e| e.event.message());
        let mut context = BTreeMap::new();
        if let Some(message) = message {
            context.insert("message_id".to_string(), message.id.clone());
            context.insert("author_id".to_string(), message.author.id.clone());
            context.insert("channel_id".to_string(), message.channel_id.clone());
            context.insert("content".to_string(), message.content.clone());
            if let Some(ts) = message.timestamp {
                context.insert("timestamp".to_string(), ts.to_rfc3339());
            }
        }

        let backtrace = Backtrace::force_capture().to_string();
        error!(
            %service,
            error = %format!("{err:#}"),
            ?context,
            backtrace = %backtrace,
            "error handling event"
        );
        outcome.logged = true;

        for handler in handlers {
            match handler {
                ErrorHandler::Sentry => {
                    let Some(sink) = &self.sink else { continue };
                    if !self.global.check() {
                        warn!(%service, "error report dropped by rate limit");
                        continue;
                    }
                    sink.capture(ErrorReport {
                        service: service.to_string(),
                        error: format!("{err:#}"),
                        backtrace: backtrace.clone(),
                        context: context.clone(),
                    })
                    .await;
                    outcome.captured = true;
                }
                ErrorHandler::Discord => {
                    let (Some(notices), Some(message)) = (&self.notices, message) else {
                        continue;
                    };
                    if !self.per_channel.check(&message.channel_id) {
                        continue;
                    }
                    let notice = ErrorNotice {
                        channel_id: message.channel_id.clone(),
                        content: format!("Something went wrong.\n```\n{err}\n```"),
                    };
                    match notices.try_send(notice) {
                        Ok(()) => outcome.notified = true,
                        Err(e) => warn!(%service, error = %e, "error notice dropped"),
                    }
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    use crate::config::PrefixConfig;
    use crate::engine::events::GatewayEvent;
    use crate::state::models::Message;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<ErrorReport>>,
    }

    #[async_trait]
    impl ErrorSink for RecordingSink {
        async fn capture(&self, report: ErrorReport) {
            self.reports.lock().unwrap().push(report);
        }
    }

    fn message_event(channel_id: &str) -> EventContainer {
        let event = GatewayEvent::MessageCreate(Message {
            id: "m".into(),
            channel_id: channel_id.into(),
            guild_id: "g".into(),
            content: "/boom".into(),
            ..Default::default()
        });
        EventContainer::new(event, "k", "bot", Utc::now(), &PrefixConfig::default())
    }

    #[tokio::test]
    async fn test_expected_errors_are_dropped() {
        let reporter = ErrorReporter::new(10.0, 10.0);
        let err = anyhow::Error::new(StateError::NotFound).context("loading guild");
        let outcome = reporter
            .report("stats", &err, &[ErrorHandler::Sentry], None)
            .await;
        assert_eq!(outcome, ReportOutcome::default());
    }

    #[tokio::test]
    async fn test_sentry_capture_is_rate_limited() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ErrorReporter::new(1.0, 1.0).with_sink(sink.clone());
        let event = message_event("c");
        let err = anyhow::anyhow!("boom");

        let first = reporter
            .report("stats", &err, &[ErrorHandler::Sentry], Some(&event))
            .await;
        let second = reporter
            .report("stats", &err, &[ErrorHandler::Sentry], Some(&event))
            .await;
        assert!(first.captured);
        assert!(second.logged && !second.captured);

        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].context["channel_id"], "c");
        assert_eq!(reports[0].context["content"], "/boom");
    }

    #[tokio::test]
    async fn test_discord_notice_per_channel_limit() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = ErrorReporter::new(1.0, 1.0).with_notices(tx);
        let err = anyhow::anyhow!("boom");

        for channel in ["a", "a", "b"] {
            let event = message_event(channel);
            reporter
                .report("stats", &err, &[ErrorHandler::Discord], Some(&event))
                .await;
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first.channel_id, "a");
        assert!(first.content.contains("boom"));
        assert_eq!(rx.recv().await.unwrap().channel_id, "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_discord_notice_needs_a_message() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = ErrorReporter::new(1.0, 1.0).with_notices(tx);
        let outcome = reporter
            .report(
                "stats",
                &anyhow::anyhow!("boom"),
                &[ErrorHandler::Discord],
                None,
            )
            .await;
        assert!(outcome.logged && !outcome.notified);
        assert!(rx.try_recv().is_err());
    }
}
