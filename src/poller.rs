use crate::consts::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_DELAY_MILLIS};
use crate::error::AppError;
use crate::vapi_types::CallStatus;

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Anything that can report a call's current status. `VapiClient` in production, a stub in
/// tests.
pub trait CallStatusSource {
    async fn call_status(&self, call_id: &str) -> Result<CallStatus, AppError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_POLL_DELAY_MILLIS),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorUrls {
    pub listen_url: String,
    pub control_url: Option<String>,
}

/// Poll the provider until it publishes a listen url for `call_id`.
///
/// Makes at most `policy.attempts` status requests, sleeping `policy.delay` between them. A
/// failed request is retried unless it was the last attempt, in which case its error is
/// returned. Dropping the future stops polling.
pub async fn poll_monitor_urls<S: CallStatusSource>(
    source: &S,
    call_id: &str,
    policy: PollPolicy,
) -> Result<MonitorUrls, AppError> {
    debug!(call_id, attempts = policy.attempts, "polling for listenUrl");
    for attempt in 1..=policy.attempts {
        match source.call_status(call_id).await {
            Ok(status) => {
                if let Some(listen_url) = status.listen_url() {
                    info!(call_id, attempt, listen_url, "listenUrl ready");
                    return Ok(MonitorUrls {
                        listen_url: listen_url.to_string(),
                        control_url: status.control_url().map(str::to_string),
                    });
                }
                debug!(call_id, attempt, "no listenUrl yet");
            }
            Err(e) => {
                warn!(call_id, attempt, attempts = policy.attempts, error = %e, "polling error");
                if attempt == policy.attempts {
                    return Err(e);
                }
            }
        }
        if attempt < policy.attempts {
            sleep(policy.delay).await;
        }
    }
    Err(AppError::PollTimeout {
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vapi_types::Monitor;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers with a listen url from attempt `ready_on` onwards, failing on the attempts listed
    /// in `fail_on`.
    struct StubSource {
        ready_on: Option<u32>,
        fail_on: Vec<u32>,
        calls: AtomicU32,
    }

    impl StubSource {
        fn new(ready_on: Option<u32>) -> Self {
            Self {
                ready_on,
                fail_on: vec![],
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CallStatusSource for StubSource {
        async fn call_status(&self, call_id: &str) -> Result<CallStatus, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&n) {
                return Err(AppError::Upstream {
                    service: "vapi",
                    status: 503,
                    body: "busy".into(),
                });
            }
            let ready = self.ready_on.map_or(false, |r| n >= r);
            Ok(CallStatus {
                id: call_id.to_string(),
                status: Some("queued".into()),
                monitor: Some(Monitor {
                    listen_url: ready.then(|| format!("wss://listen/{n}")),
                    control_url: ready.then(|| "https://control/9".to_string()),
                }),
            })
        }
    }

    fn fast(attempts: u32) -> PollPolicy {
        PollPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn returns_first_url_after_exactly_n_requests() {
        let source = StubSource::new(Some(3));
        let urls = poll_monitor_urls(&source, "call_9", fast(30)).await.unwrap();
        assert_eq!(urls.listen_url, "wss://listen/3");
        assert_eq!(urls.control_url.as_deref(), Some("https://control/9"));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn url_on_last_attempt_is_accepted() {
        let source = StubSource::new(Some(5));
        let urls = poll_monitor_urls(&source, "call_9", fast(5)).await.unwrap();
        assert_eq!(urls.listen_url, "wss://listen/5");
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test]
    async fn exhausted_budget_times_out_without_extra_requests() {
        let source = StubSource::new(None);
        let err = poll_monitor_urls(&source, "call_9", fast(4))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PollTimeout { attempts: 4 }));
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let source = StubSource {
            fail_on: vec![1, 2],
            ..StubSource::new(Some(3))
        };
        let urls = poll_monitor_urls(&source, "call_9", fast(10)).await.unwrap();
        assert_eq!(urls.listen_url, "wss://listen/3");
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn error_on_final_attempt_is_returned() {
        let source = StubSource {
            fail_on: vec![2],
            ..StubSource::new(None)
        };
        let err = poll_monitor_urls(&source, "call_9", fast(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream { status: 503, .. }));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_configured_delay_between_attempts() {
        let source = StubSource::new(Some(3));
        let started = tokio::time::Instant::now();
        let policy = PollPolicy {
            attempts: 30,
            delay: Duration::from_secs(2),
        };
        poll_monitor_urls(&source, "call_9", policy).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }
}
