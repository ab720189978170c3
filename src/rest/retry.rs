use std::time::Duration;

use http::StatusCode;
use rand::Rng;
use tokio::time::Instant;

use crate::error::{Error, ErrorCode, Result};

/// The situations a retry strategy reacts to.
#[derive(Debug, Clone)]
pub enum RetryRequest {
    Unknown,
    Response { status: StatusCode, message: String },
    Connection { code: ErrorCode, message: String },
}

impl RetryRequest {
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Response { status, message } => Self::Response {
                status: *status,
                message: message.clone(),
            },
            Error::Connection { code, message } => Self::Connection {
                code: *code,
                message: message.clone(),
            },
            _ => Self::Unknown,
        }
    }
}

/// Delay between subsequent retries.
#[derive(Debug, Clone)]
enum Delay {
    Constant(Duration),
    /// `base * grow^(attempt + 1)`, clamped to `cap`, jittered. With full
    /// jitter the wait is uniform in `[0, max)`; equal jitter guarantees at
    /// least half of it and is used for HTTP 429 when enabled.
    ExponentialBackoff {
        base: u32,
        grow: u32,
        cap: u32,
        equal_jitter_on_throttle: bool,
    },
}

impl Delay {
    fn next_sleep(&self, attempt: u32, request: &RetryRequest) -> Duration {
        match self {
            Self::Constant(delay) => *delay,
            Self::ExponentialBackoff {
                base,
                grow,
                cap,
                equal_jitter_on_throttle,
            } => {
                let max_sleep = (f64::from(*base) * f64::from(*grow).powi(attempt as i32 + 1))
                    .min(f64::from(*cap));

                let throttled = *equal_jitter_on_throttle
                    && matches!(
                        request,
                        RetryRequest::Response { status, .. }
                            if *status == StatusCode::TOO_MANY_REQUESTS
                    );

                if max_sleep <= 0.0 {
                    return Duration::ZERO;
                }

                let mut rng = rand::thread_rng();
                let wait = if throttled {
                    max_sleep / 2.0 + rng.gen_range(0.0..max_sleep / 2.0)
                } else {
                    rng.gen_range(0.0..max_sleep)
                };

                Duration::from_secs_f64(wait)
            }
        }
    }
}

/// A single retry condition. Conditions are evaluated in FIFO order; the
/// first one to return a decision wins, and no decision means no retry.
#[derive(Debug, Clone)]
enum Condition {
    UnknownErrors,
    ServerErrors,
    Status(StatusCode),
    StatusWithMessage(StatusCode, String),
    ConnectionCode(ErrorCode),
}

impl Condition {
    fn decide(&self, request: &RetryRequest) -> Option<bool> {
        match (self, request) {
            (Self::UnknownErrors, RetryRequest::Unknown) => Some(true),
            (Self::ServerErrors, RetryRequest::Response { status, .. })
                if status.is_server_error() =>
            {
                Some(true)
            }
            (Self::Status(code), RetryRequest::Response { status, .. }) if status == code => {
                Some(true)
            }
            (
                Self::StatusWithMessage(code, text),
                RetryRequest::Response { status, message },
            ) if status == code && message.contains(text) => Some(true),
            (Self::ConnectionCode(code), RetryRequest::Connection { code: actual, .. })
                if code == actual =>
            {
                Some(true)
            }
            _ => None,
        }
    }
}

/// Immutable retry configuration; [`RetryStrategy::session`] produces the
/// per-call state machine.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    delay: Delay,
    conditions: Vec<Condition>,
    max_attempts: Option<u32>,
    max_elapsed_time: Option<Duration>,
}

impl RetryStrategy {
    pub fn builder_constant(sleep_time_s: u32) -> RetryStrategyBuilder {
        RetryStrategyBuilder::new(Delay::Constant(Duration::from_secs(u64::from(sleep_time_s))))
    }

    pub fn builder_exponential(
        base_delay_s: u32,
        exponent_grow_factor: u32,
        max_wait_between_calls_s: u32,
        equal_jitter_for_throttling: bool,
    ) -> RetryStrategyBuilder {
        let mut builder = RetryStrategyBuilder::new(Delay::ExponentialBackoff {
            base: base_delay_s,
            grow: exponent_grow_factor,
            cap: max_wait_between_calls_s,
            equal_jitter_on_throttle: equal_jitter_for_throttling,
        });

        if equal_jitter_for_throttling {
            // throttling responses must be retriable for the jitter to matter
            builder = builder.retry_on_status(StatusCode::TOO_MANY_REQUESTS);
        }

        builder
    }

    pub fn session(&self) -> RetrySession<'_> {
        RetrySession {
            strategy: self,
            start: Instant::now(),
            retry_count: 0,
            next_sleep: Duration::ZERO,
        }
    }
}

/// Per-request retry state: attempt counter, start time, planned sleep.
pub struct RetrySession<'a> {
    strategy: &'a RetryStrategy,
    start: Instant,
    retry_count: u32,
    next_sleep: Duration,
}

impl RetrySession<'_> {
    /// Decides whether the operation should be retried. Computes the next
    /// sleep first so the elapsed-time budget can account for it: a retry is
    /// rejected when `elapsed + next_sleep` would reach the limit.
    pub fn should_retry(&mut self, request: &RetryRequest) -> bool {
        self.next_sleep = self.strategy.delay.next_sleep(self.retry_count, request);

        if let Some(max) = self.strategy.max_attempts {
            if self.retry_count >= max {
                return false;
            }
        }

        if let Some(max_elapsed) = self.strategy.max_elapsed_time {
            if self.start.elapsed() + self.next_sleep >= max_elapsed {
                return false;
            }
        }

        let mut decision = None;
        for condition in &self.strategy.conditions {
            if let Some(d) = condition.decide(request) {
                decision = Some(d);
                break;
            }
        }

        decision.unwrap_or(false)
    }

    pub fn next_sleep_time(&self) -> Duration {
        self.next_sleep
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub async fn wait_for_retry(&mut self) {
        tokio::time::sleep(self.next_sleep).await;
        self.retry_count += 1;
    }
}

/// Builds a retry strategy. At least one stop criterion (max attempts or max
/// elapsed time) must be set.
#[derive(Debug)]
pub struct RetryStrategyBuilder {
    delay: Delay,
    conditions: Vec<Condition>,
    max_attempts: Option<u32>,
    max_elapsed_time: Option<Duration>,
}

impl RetryStrategyBuilder {
    fn new(delay: Delay) -> Self {
        Self {
            delay,
            // unknown errors are always retried, subject to the stop criteria
            conditions: vec![Condition::UnknownErrors],
            max_attempts: None,
            max_elapsed_time: None,
        }
    }

    pub fn max_attempts(mut self, retries: u32) -> Self {
        self.max_attempts = Some(retries);
        self
    }

    pub fn max_elapsed_time(mut self, seconds: u32) -> Self {
        self.max_elapsed_time = Some(Duration::from_secs(u64::from(seconds)));
        self
    }

    pub fn retry_on_server_errors(mut self) -> Self {
        self.conditions.push(Condition::ServerErrors);
        self
    }

    pub fn retry_on_status(mut self, code: StatusCode) -> Self {
        self.conditions.push(Condition::Status(code));
        self
    }

    /// Retries on `code`, but only when the error message contains `text`.
    pub fn retry_on_status_with_message(mut self, code: StatusCode, text: &str) -> Self {
        self.conditions
            .push(Condition::StatusWithMessage(code, text.to_string()));
        self
    }

    pub fn retry_on_connection_error(mut self, code: ErrorCode) -> Self {
        self.conditions.push(Condition::ConnectionCode(code));
        self
    }

    pub fn build(self) -> Result<RetryStrategy> {
        if self.max_attempts.is_none() && self.max_elapsed_time.is_none() {
            return Err(Error::Validation(
                "A stop criteria must be defined to avoid infinite retries.".to_string(),
            ));
        }

        Ok(RetryStrategy {
            delay: self.delay,
            conditions: self.conditions,
            max_attempts: self.max_attempts,
            max_elapsed_time: self.max_elapsed_time,
        })
    }
}

/// The strategy used by the signed REST service when the caller does not
/// supply one: exponential back-off with retries on server errors and on the
/// connection failures which are worth repeating.
pub fn default_retry_strategy() -> RetryStrategy {
    RetryStrategy::builder_exponential(1, 2, 60, true)
        .max_attempts(10)
        .retry_on_server_errors()
        .retry_on_connection_error(ErrorCode::CouldntResolveHost)
        .retry_on_connection_error(ErrorCode::CouldntConnect)
        .retry_on_connection_error(ErrorCode::OperationTimedout)
        .retry_on_connection_error(ErrorCode::SendError)
        .retry_on_connection_error(ErrorCode::RecvError)
        .retry_on_connection_error(ErrorCode::PartialFile)
        .retry_on_connection_error(ErrorCode::GotNothing)
        .retry_on_connection_error(ErrorCode::SslConnectError)
        .retry_on_connection_error(ErrorCode::Http2)
        .retry_on_connection_error(ErrorCode::Http2Stream)
        .build()
        .expect("default retry strategy has a stop criteria")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(status: StatusCode) -> RetryRequest {
        RetryRequest::Response {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn builder_requires_stop_criteria() {
        let err = RetryStrategy::builder_constant(1).build().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(RetryStrategy::builder_constant(1)
            .max_attempts(3)
            .build()
            .is_ok());
        assert!(RetryStrategy::builder_constant(1)
            .max_elapsed_time(10)
            .build()
            .is_ok());
    }

    #[test]
    fn response_errors_are_not_retried_by_default() {
        let strategy = RetryStrategy::builder_constant(0)
            .max_attempts(5)
            .build()
            .unwrap();
        let mut session = strategy.session();

        assert!(!session.should_retry(&response(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(session.should_retry(&RetryRequest::Unknown));
    }

    #[test]
    fn server_errors_condition_accepts_only_5xx() {
        let strategy = RetryStrategy::builder_constant(0)
            .max_attempts(5)
            .retry_on_server_errors()
            .build()
            .unwrap();
        let mut session = strategy.session();

        assert!(session.should_retry(&response(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(session.should_retry(&response(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(!session.should_retry(&response(StatusCode::NOT_FOUND)));
        assert!(!session.should_retry(&response(StatusCode::TOO_MANY_REQUESTS)));
    }

    #[test]
    fn message_condition_requires_substring() {
        let strategy = RetryStrategy::builder_constant(0)
            .max_attempts(5)
            .retry_on_status_with_message(StatusCode::BAD_REQUEST, "TimeoutException")
            .build()
            .unwrap();
        let mut session = strategy.session();

        assert!(session.should_retry(&RetryRequest::Response {
            status: StatusCode::BAD_REQUEST,
            message: "ServerError: TimeoutException while reading".to_string(),
        }));
        assert!(!session.should_retry(&RetryRequest::Response {
            status: StatusCode::BAD_REQUEST,
            message: "invalid argument".to_string(),
        }));
    }

    #[test]
    fn conditions_are_checked_fifo() {
        // first condition decides; the later blanket condition never runs
        let strategy = RetryStrategy::builder_constant(0)
            .max_attempts(5)
            .retry_on_status_with_message(StatusCode::INTERNAL_SERVER_ERROR, "try again")
            .retry_on_server_errors()
            .build()
            .unwrap();
        let mut session = strategy.session();

        assert!(session.should_retry(&RetryRequest::Response {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "please try again".to_string(),
        }));
        // no message match, but the ServerErrors condition still decides
        assert!(session.should_retry(&response(StatusCode::INTERNAL_SERVER_ERROR)));
    }

    #[test]
    fn connection_codes_must_be_registered() {
        let strategy = RetryStrategy::builder_constant(0)
            .max_attempts(5)
            .retry_on_connection_error(ErrorCode::CouldntConnect)
            .build()
            .unwrap();
        let mut session = strategy.session();

        assert!(session.should_retry(&RetryRequest::Connection {
            code: ErrorCode::CouldntConnect,
            message: String::new(),
        }));
        assert!(!session.should_retry(&RetryRequest::Connection {
            code: ErrorCode::SslCertproblem,
            message: String::new(),
        }));
    }

    #[tokio::test]
    async fn max_attempts_is_enforced() {
        let strategy = RetryStrategy::builder_constant(0)
            .max_attempts(3)
            .retry_on_server_errors()
            .build()
            .unwrap();
        let mut session = strategy.session();

        let mut retries = 0;
        while session.should_retry(&response(StatusCode::BAD_GATEWAY)) {
            session.wait_for_retry().await;
            retries += 1;
        }
        assert_eq!(retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_respects_elapsed_budget() {
        // base=1s, grow=2, cap=4s, equal jitter on 429, max elapsed 12s:
        // against endless throttling the attempt count lands in [3, 6] and
        // the sum of sleeps stays below the budget
        let strategy = RetryStrategy::builder_exponential(1, 2, 4, true)
            .max_elapsed_time(12)
            .build()
            .unwrap();
        let mut session = strategy.session();

        let mut total_sleep = Duration::ZERO;
        let mut attempts = 0;
        while session.should_retry(&response(StatusCode::TOO_MANY_REQUESTS)) {
            total_sleep += session.next_sleep_time();
            session.wait_for_retry().await;
            attempts += 1;
        }

        assert!((3..=6).contains(&attempts), "attempts = {attempts}");
        assert!(total_sleep < Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn equal_jitter_guarantees_half_the_wait() {
        let strategy = RetryStrategy::builder_exponential(2, 2, 60, true)
            .max_attempts(20)
            .build()
            .unwrap();
        let mut session = strategy.session();

        // first throttled retry: max = min(2 * 2^1, 60) = 4s, so the equal
        // jitter window is [2, 4)
        assert!(session.should_retry(&response(StatusCode::TOO_MANY_REQUESTS)));
        let sleep = session.next_sleep_time();
        assert!(sleep >= Duration::from_secs(2), "sleep = {sleep:?}");
        assert!(sleep < Duration::from_secs(4), "sleep = {sleep:?}");
    }
}
