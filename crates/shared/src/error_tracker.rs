//! Error aggregation and escalation
//!
//! Tracks per-error-type occurrence counts in a trailing window and decides
//! when repeated server-side failures should be escalated to a notification
//! channel. Aggregation state is in-process only: each instance aggregates
//! independently unless a shared store is substituted.
//!
//! Escalation is edge-triggered. A notification fires on the transition to
//! `count >= threshold`, not on every call above it; the trigger re-arms
//! only after pruning drops the count back below the threshold.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error};

/// Default trailing aggregation window (5 minutes)
pub const DEFAULT_WINDOW_SECONDS: i64 = 300;

/// Default occurrences within the window that trigger a notification
pub const DEFAULT_THRESHOLD: usize = 5;

/// Status codes worth escalating (server-side failures)
const NOTIFY_STATUSES: [u16; 2] = [500, 503];

/// Snapshot of the request an error occurred on.
///
/// Carried in notifications and logs; never returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub identity: String,
}

/// Emitted once per threshold crossing for a notify-worthy error type.
#[derive(Debug, Clone)]
pub struct ErrorNotification {
    pub error_type: String,
    pub status: u16,
    pub occurrences: usize,
    pub first_seen: i64,
    pub last_seen: i64,
    /// Context of the occurrence that crossed the threshold
    pub context: ErrorContext,
}

/// Sink for escalated errors.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, notification: &ErrorNotification);
}

/// Default channel: escalations land in the structured log.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn notify(&self, notification: &ErrorNotification) {
        error!(
            error_type = %notification.error_type,
            status = notification.status,
            occurrences = notification.occurrences,
            first_seen = notification.first_seen,
            last_seen = notification.last_seen,
            path = %notification.context.path,
            "Error threshold crossed"
        );
    }
}

/// Rolling window of occurrences for one error type
#[derive(Debug, Default)]
struct TypeWindow {
    timestamps: VecDeque<i64>,
    /// Set when a notification has fired for the current crossing
    notified: bool,
}

/// Aggregates errors by type and decides when to escalate.
///
/// Constructed once at startup and shared by reference across requests.
pub struct ErrorAggregator {
    window_seconds: i64,
    threshold: usize,
    windows: DashMap<String, TypeWindow>,
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECONDS, DEFAULT_THRESHOLD)
    }
}

impl ErrorAggregator {
    pub fn new(window_seconds: i64, threshold: usize) -> Self {
        debug!(window_seconds, threshold, "Error aggregator initialized");
        Self {
            window_seconds,
            threshold,
            windows: DashMap::new(),
        }
    }

    /// Record one occurrence of `error_type` and evaluate the escalation
    /// rule. Returns a notification exactly when this occurrence crosses the
    /// threshold for a notify-worthy status.
    pub fn record(
        &self,
        error_type: &str,
        status: u16,
        context: &ErrorContext,
    ) -> Option<ErrorNotification> {
        self.record_at(error_type, status, context, Utc::now().timestamp())
    }

    fn record_at(
        &self,
        error_type: &str,
        status: u16,
        context: &ErrorContext,
        now: i64,
    ) -> Option<ErrorNotification> {
        let mut window = self.windows.entry(error_type.to_string()).or_default();

        window.timestamps.push_back(now);

        // Evict records older than the window before evaluating the
        // threshold. Anything older never counts, even if a concurrent
        // shard held them a moment longer.
        let cutoff = now - self.window_seconds;
        while window.timestamps.front().is_some_and(|&t| t <= cutoff) {
            window.timestamps.pop_front();
        }

        let occurrences = window.timestamps.len();
        if occurrences < self.threshold {
            // Window rolled below the threshold: re-arm the trigger
            window.notified = false;
            return None;
        }

        if window.notified || !NOTIFY_STATUSES.contains(&status) {
            return None;
        }

        window.notified = true;
        let first_seen = *window.timestamps.front().unwrap_or(&now);

        Some(ErrorNotification {
            error_type: error_type.to_string(),
            status,
            occurrences,
            first_seen,
            last_seen: now,
            context: context.clone(),
        })
    }

    /// Occurrences of `error_type` currently inside the window.
    pub fn occurrences(&self, error_type: &str, now: i64) -> usize {
        let cutoff = now - self.window_seconds;
        self.windows
            .get(error_type)
            .map(|w| w.timestamps.iter().filter(|&&t| t > cutoff).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ErrorContext {
        ErrorContext {
            method: "GET".to_string(),
            path: "/api/v1/products".to_string(),
            client_ip: "10.0.0.1".to_string(),
            identity: "anonymous".to_string(),
        }
    }

    #[test]
    fn test_one_notification_per_crossing() {
        let aggregator = ErrorAggregator::new(300, 5);
        let now = 1_700_000_000;

        for i in 0..4 {
            assert!(aggregator
                .record_at("InternalServerError", 500, &ctx(), now + i)
                .is_none());
        }

        // 5th occurrence crosses the threshold
        let notification = aggregator
            .record_at("InternalServerError", 500, &ctx(), now + 4)
            .expect("threshold crossing should notify");
        assert_eq!(notification.occurrences, 5);
        assert_eq!(notification.first_seen, now);
        assert_eq!(notification.last_seen, now + 4);

        // 6th within the same window emits nothing
        assert!(aggregator
            .record_at("InternalServerError", 500, &ctx(), now + 5)
            .is_none());
    }

    #[test]
    fn test_rearm_after_window_elapses() {
        let aggregator = ErrorAggregator::new(300, 5);
        let now = 1_700_000_000;

        for i in 0..5 {
            aggregator.record_at("InternalServerError", 500, &ctx(), now + i);
        }

        // Far enough that all prior records fall out of the window
        let later = now + 400;
        for i in 0..4 {
            assert!(aggregator
                .record_at("InternalServerError", 500, &ctx(), later + i)
                .is_none());
        }
        let second = aggregator.record_at("InternalServerError", 500, &ctx(), later + 4);
        assert!(second.is_some(), "new crossing after the window should notify again");
    }

    #[test]
    fn test_client_errors_never_notify() {
        let aggregator = ErrorAggregator::new(300, 5);
        let now = 1_700_000_000;

        for i in 0..20 {
            assert!(aggregator
                .record_at("ValidationError", 422, &ctx(), now + i)
                .is_none());
        }
    }

    #[test]
    fn test_503_is_notify_worthy() {
        let aggregator = ErrorAggregator::new(300, 5);
        let now = 1_700_000_000;

        for i in 0..4 {
            aggregator.record_at("DependencyUnavailable", 503, &ctx(), now + i);
        }
        assert!(aggregator
            .record_at("DependencyUnavailable", 503, &ctx(), now + 4)
            .is_some());
    }

    #[test]
    fn test_types_are_counted_independently() {
        let aggregator = ErrorAggregator::new(300, 5);
        let now = 1_700_000_000;

        for i in 0..4 {
            aggregator.record_at("InternalServerError", 500, &ctx(), now + i);
            aggregator.record_at("DependencyUnavailable", 503, &ctx(), now + i);
        }
        assert_eq!(aggregator.occurrences("InternalServerError", now + 4), 4);
        assert_eq!(aggregator.occurrences("DependencyUnavailable", now + 4), 4);

        // Neither type has crossed on its own yet
        assert!(aggregator
            .record_at("NotFound", 404, &ctx(), now + 4)
            .is_none());
    }

    #[test]
    fn test_stale_records_excluded_from_threshold() {
        let aggregator = ErrorAggregator::new(300, 3);
        let now = 1_700_000_000;

        aggregator.record_at("InternalServerError", 500, &ctx(), now);
        aggregator.record_at("InternalServerError", 500, &ctx(), now + 1);

        // Both prior records are past the window by now + 301
        assert!(aggregator
            .record_at("InternalServerError", 500, &ctx(), now + 302)
            .is_none());
        assert_eq!(aggregator.occurrences("InternalServerError", now + 302), 1);
    }
}
