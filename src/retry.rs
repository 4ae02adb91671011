//! The retry loop.
//!
//! [`RetryController`] is the single place where retry decisions are made.
//! Each attempt is sequenced as: rate-limiter admission, `AttemptStarted`
//! event, transport call under the per-attempt timeout, latency measurement,
//! classification through the injected [`RetryCondition`], then either a
//! backoff sleep and the next attempt or a terminal outcome. Latency covers
//! the transport call only; limiter and backoff waits are recorded
//! separately.
//!
//! The per-attempt timeout drops the in-flight transport future when it
//! elapses, so an abandoned attempt cannot leak into the next one. If the
//! whole execution future is dropped, a guard emits a final
//! `ExecutionAborted` event on the way out.

use crate::backoff::{BackoffMode, BackoffParameters};
use crate::config::RetryCondition;
use crate::error::{ClientError, TransportError};
use crate::events::{class_label, millis, EventSink, NullSink, RequestEvent};
use crate::limiter::RateLimiter;
use crate::request::{
    generate_request_id, AttemptOutcome, AttemptRecord, Execution, ExecutionReport, RequestSpec,
};
use crate::transport::Transport;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

static NULL_SINK: NullSink = NullSink;

/// Emits `ExecutionAborted` if the execution future is dropped before it
/// reaches a terminal state.
struct AbortGuard<'a> {
    sink: &'a dyn EventSink,
    request_id: String,
    attempt: u32,
    armed: bool,
}

impl AbortGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.sink.emit(&RequestEvent::ExecutionAborted {
                request_id: self.request_id.clone(),
                attempt: self.attempt,
            });
        }
    }
}

/// Drives one execution: attempt loop, retry decisions, deadline, events.
pub struct RetryController<'a> {
    transport: &'a dyn Transport,
    condition: &'a RetryCondition,
    backoff: &'a BackoffParameters,
    backoff_mode: BackoffMode,
    max_retries: u32,
    attempt_timeout: Duration,
    overall_deadline: Option<Duration>,
    limiter: Option<&'a RateLimiter>,
    sink: &'a dyn EventSink,
}

impl<'a> RetryController<'a> {
    /// Create a controller with no limiter, no deadline, and a discarding
    /// sink.
    pub fn new(
        transport: &'a dyn Transport,
        condition: &'a RetryCondition,
        backoff: &'a BackoffParameters,
        backoff_mode: BackoffMode,
    ) -> Self {
        Self {
            transport,
            condition,
            backoff,
            backoff_mode,
            max_retries: 3,
            attempt_timeout: Duration::from_secs(30),
            overall_deadline: None,
            limiter: None,
            sink: &NULL_SINK,
        }
    }

    /// Set the maximum number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the default per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the default overall deadline.
    #[must_use]
    pub fn overall_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.overall_deadline = deadline;
        self
    }

    /// Gate every attempt through a rate limiter.
    #[must_use]
    pub fn limiter(mut self, limiter: Option<&'a RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Send events to the given sink.
    #[must_use]
    pub fn sink(mut self, sink: &'a dyn EventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Run the execution to a terminal outcome.
    ///
    /// Never performs more than `max_retries + 1` attempts; attempt indices
    /// are exactly `1, 2, …, k`. The returned report is frozen and fully
    /// explains the outcome.
    pub async fn run(&self, spec: &RequestSpec) -> Result<Execution, ClientError> {
        let request_id = generate_request_id();
        let started = Instant::now();
        let max_attempts = self.max_retries.saturating_add(1);
        let attempt_timeout = spec.timeout.unwrap_or(self.attempt_timeout);
        let deadline = spec
            .deadline
            .or(self.overall_deadline)
            .map(|d| started + d);

        let mut report = ExecutionReport::new(request_id.clone());
        let mut delay_before = Duration::ZERO;
        let mut last_error: Option<TransportError> = None;
        let mut guard = AbortGuard {
            sink: self.sink,
            request_id: request_id.clone(),
            attempt: 1,
            armed: true,
        };

        loop {
            let attempt = report.attempt_count() + 1;
            guard.attempt = attempt;

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    report.total_elapsed = started.elapsed();
                    self.finish(&mut guard, &report, "deadline_exceeded");
                    return Err(ClientError::DeadlineExceeded {
                        last: last_error,
                        report,
                    });
                }
            }

            if let Some(limiter) = self.limiter {
                let waited = limiter.acquire().await;
                if waited > Duration::ZERO {
                    report.rate_limit_wait += waited;
                    self.sink.emit(&RequestEvent::RateLimitWait {
                        request_id: request_id.clone(),
                        wait_ms: millis(waited),
                    });
                }
                // A saturated limiter can consume the whole budget; no
                // attempt may start past the deadline.
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        report.total_elapsed = started.elapsed();
                        self.finish(&mut guard, &report, "deadline_exceeded");
                        return Err(ClientError::DeadlineExceeded {
                            last: last_error,
                            report,
                        });
                    }
                }
            }

            self.sink.emit(&RequestEvent::AttemptStarted {
                request_id: request_id.clone(),
                attempt,
                method: spec.method.to_string(),
                url: spec.url.to_string(),
            });

            let started_at = Utc::now();
            let attempt_start = Instant::now();
            let result = match timeout(attempt_timeout, self.transport.send(spec)).await {
                Ok(result) => result,
                // Elapsing drops the transport future, abandoning the
                // in-flight call.
                Err(_) => Err(TransportError::Timeout),
            };
            let latency = attempt_start.elapsed();

            match result {
                Ok(response) => {
                    report.attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        latency,
                        delay_before,
                        outcome: AttemptOutcome::Succeeded {
                            status: response.status,
                        },
                    });
                    report.total_elapsed = started.elapsed();
                    self.sink.emit(&RequestEvent::AttemptSucceeded {
                        request_id: request_id.clone(),
                        attempt,
                        status: response.status,
                        latency_ms: millis(latency),
                    });
                    self.finish(&mut guard, &report, "success");
                    return Ok(Execution { response, report });
                }
                Err(error) => {
                    let class = error.class();
                    let message = error.to_string();
                    report.attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        latency,
                        delay_before,
                        outcome: AttemptOutcome::Failed {
                            class,
                            message: message.clone(),
                        },
                    });
                    self.sink.emit(&RequestEvent::AttemptFailed {
                        request_id: request_id.clone(),
                        attempt,
                        class: class_label(class),
                        error: message.clone(),
                        latency_ms: millis(latency),
                    });

                    if !self.condition.should_retry(&error) {
                        report.total_elapsed = started.elapsed();
                        self.finish(&mut guard, &report, "aborted");
                        return Err(ClientError::Aborted {
                            last: error,
                            report,
                        });
                    }

                    if attempt >= max_attempts {
                        report.total_elapsed = started.elapsed();
                        self.finish(&mut guard, &report, "retries_exhausted");
                        return Err(ClientError::RetriesExhausted {
                            last: error,
                            report,
                        });
                    }

                    let mut delay = self.backoff.delay(self.backoff_mode, attempt);
                    if let Some(hint) = error.retry_after() {
                        delay = delay.max(hint).min(self.backoff.max_delay);
                    }

                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            report.total_elapsed = started.elapsed();
                            self.finish(&mut guard, &report, "deadline_exceeded");
                            return Err(ClientError::DeadlineExceeded {
                                last: Some(error),
                                report,
                            });
                        }
                    }

                    self.sink.emit(&RequestEvent::RetryScheduled {
                        request_id: request_id.clone(),
                        attempt,
                        max_attempts,
                        delay_ms: millis(delay),
                        error: message,
                    });
                    last_error = Some(error);
                    sleep(delay).await;
                    delay_before = delay;
                }
            }
        }
    }

    fn finish(&self, guard: &mut AbortGuard<'_>, report: &ExecutionReport, outcome: &str) {
        guard.disarm();
        self.sink.emit(&RequestEvent::ExecutionCompleted {
            request_id: report.request_id.clone(),
            attempts: report.attempt_count(),
            total_ms: millis(report.total_elapsed),
            outcome: outcome.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FailureClass;
    use crate::transport::Response;
    use async_trait::async_trait;
    use reqwest::{Method, Url};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Response, TransportError>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Response, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _spec: &RequestSpec) -> Result<Response, TransportError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Protocol("script exhausted".into())))
        }
    }

    struct SlowTransport {
        delay: Duration,
        result: fn() -> Result<Response, TransportError>,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn send(&self, _spec: &RequestSpec) -> Result<Response, TransportError> {
            sleep(self.delay).await;
            (self.result)()
        }
    }

    fn ok(status: u16) -> Result<Response, TransportError> {
        Ok(Response {
            status,
            body: String::new(),
        })
    }

    fn spec() -> RequestSpec {
        RequestSpec::new(Method::GET, Url::parse("http://localhost/test").unwrap())
    }

    fn fast_backoff() -> BackoffParameters {
        BackoffParameters {
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let transport = ScriptedTransport::new(vec![ok(200)]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential);

        let execution = controller.run(&spec()).await.unwrap();
        assert_eq!(execution.response.status, 200);
        assert_eq!(execution.report.attempt_count(), 1);
        assert_eq!(execution.report.attempts[0].attempt, 1);
        assert_eq!(execution.report.attempts[0].delay_before, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_retryable_failures() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::http(503, "unavailable")),
            Err(TransportError::http(503, "unavailable")),
            ok(200),
        ]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(2);

        let execution = controller.run(&spec()).await.unwrap();
        let attempts = &execution.report.attempts;
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(attempts[0].delay_before, Duration::ZERO);
        assert_eq!(attempts[1].delay_before, Duration::from_millis(10));
        assert_eq!(attempts[2].delay_before, Duration::from_millis(20));
        assert!(attempts[2].outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::http(500, "boom")),
            Err(TransportError::http(500, "boom")),
            Err(TransportError::http(500, "boom")),
        ]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(2);

        let err = controller.run(&spec()).await.unwrap_err();
        match err {
            ClientError::RetriesExhausted { last, report } => {
                assert_eq!(report.attempt_count(), 3);
                assert_eq!(last.status(), Some(500));
                assert_eq!(
                    report.attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
                    vec![1, 2, 3]
                );
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_aborts_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::http(400, "bad"))]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(5);

        let err = controller.run(&spec()).await.unwrap_err();
        match err {
            ClientError::Aborted { last, report } => {
                assert_eq!(report.attempt_count(), 1);
                assert_eq!(last.status(), Some(400));
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_timeouts_exhaust_with_timeout_classification() {
        let transport = SlowTransport {
            delay: Duration::from_secs(3600),
            result: || ok(200),
        };
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(3)
                .attempt_timeout(Duration::from_millis(50));

        let err = controller.run(&spec()).await.unwrap_err();
        match err {
            ClientError::RetriesExhausted { last, report } => {
                assert_eq!(report.attempt_count(), 4);
                assert!(matches!(last, TransportError::Timeout));
                for record in &report.attempts {
                    match &record.outcome {
                        AttemptOutcome::Failed { class, .. } => {
                            assert_eq!(*class, FailureClass::Timeout);
                        }
                        other => panic!("expected timeout failure, got {other:?}"),
                    }
                }
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_preempts_backoff_sleep() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::http(503, ""))]);
        let condition = RetryCondition::default();
        let backoff = BackoffParameters {
            base_delay: Duration::from_millis(200),
            jitter_fraction: 0.0,
            ..BackoffParameters::default()
        };
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(5)
                .overall_deadline(Some(Duration::from_millis(50)));

        let err = controller.run(&spec()).await.unwrap_err();
        match err {
            ClientError::DeadlineExceeded { last, report } => {
                assert_eq!(report.attempt_count(), 1);
                assert_eq!(last.and_then(|e| e.status()), Some(503));
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consumed_deadline_prevents_further_attempts() {
        let transport = SlowTransport {
            delay: Duration::from_millis(100),
            result: || Err(TransportError::http(503, "")),
        };
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(5)
                .overall_deadline(Some(Duration::from_millis(50)));

        let err = controller.run(&spec()).await.unwrap_err();
        match err {
            ClientError::DeadlineExceeded { report, .. } => {
                assert_eq!(report.attempt_count(), 1);
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_delay() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Http {
                status: 429,
                body: String::new(),
                retry_after: Some(Duration::from_secs(1)),
            }),
            ok(200),
        ]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(1);

        let execution = controller.run(&spec()).await.unwrap();
        assert_eq!(
            execution.report.attempts[1].delay_before,
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_limiter_cannot_outlive_the_deadline() {
        let transport = ScriptedTransport::new(vec![ok(200)]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        // One token per ten seconds, starting empty: admission alone takes
        // ten times the deadline.
        let limiter = RateLimiter::token_bucket(1, Duration::from_secs(10));
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .overall_deadline(Some(Duration::from_secs(1)))
                .limiter(Some(&limiter));

        let err = controller.run(&spec()).await.unwrap_err();
        match err {
            ClientError::DeadlineExceeded { report, .. } => {
                assert_eq!(report.attempt_count(), 0);
                assert!(report.rate_limit_wait >= Duration::from_secs(1));
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_wait_is_recorded_separately() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::http(503, "")), ok(200)]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let limiter = RateLimiter::token_bucket(1, Duration::from_millis(100));
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(1)
                .limiter(Some(&limiter));

        let execution = controller.run(&spec()).await.unwrap();
        // The second attempt had to wait for a token; that wait is not
        // attributed to transport latency.
        assert!(execution.report.rate_limit_wait > Duration::ZERO);
        assert_eq!(execution.report.working_time(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_emitted_in_attempt_order() {
        use crate::events::MemorySink;

        let transport = ScriptedTransport::new(vec![Err(TransportError::http(503, "")), ok(200)]);
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let sink = MemorySink::new();
        let controller =
            RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                .max_retries(1)
                .sink(&sink);

        controller.run(&spec()).await.unwrap();
        let events = sink.take();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                RequestEvent::AttemptStarted { .. } => "started",
                RequestEvent::AttemptSucceeded { .. } => "succeeded",
                RequestEvent::AttemptFailed { .. } => "failed",
                RequestEvent::RetryScheduled { .. } => "retry",
                RequestEvent::RateLimitWait { .. } => "rate_limit",
                RequestEvent::ExecutionCompleted { .. } => "completed",
                RequestEvent::ExecutionAborted { .. } => "aborted",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["started", "failed", "retry", "started", "succeeded", "completed"]
        );

        // All events of one execution share its correlation id.
        let id = events[0].request_id().to_string();
        assert!(events.iter().all(|e| e.request_id() == id));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_execution_emits_aborted_event() {
        use crate::events::MemorySink;

        let transport = SlowTransport {
            delay: Duration::from_secs(3600),
            result: || ok(200),
        };
        let condition = RetryCondition::default();
        let backoff = fast_backoff();
        let sink = MemorySink::new();
        {
            let controller =
                RetryController::new(&transport, &condition, &backoff, BackoffMode::Exponential)
                    .sink(&sink);
            let request = spec();
            let run = controller.run(&request);
            tokio::pin!(run);
            // Poll once so the first attempt starts, then drop mid-flight.
            let poll = futures::poll!(run.as_mut());
            assert!(poll.is_pending());
        }

        let events = sink.take();
        assert!(matches!(
            events.last(),
            Some(RequestEvent::ExecutionAborted { attempt: 1, .. })
        ));
    }
}
