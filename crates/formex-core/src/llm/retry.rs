//! Bounded exponential backoff around a chat transport.

use std::time::Duration;

use tracing::{debug, warn};

use super::{ChatRequest, ChatTransport, LanguageModel};
use crate::error::{ApiError, LlmError};
use crate::models::config::LlmConfig;

/// How many times to retry and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubled for each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Wait after failed attempt `attempt` (0-based): `base_delay * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Blocks the current thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps with `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A [`LanguageModel`] that retries transient transport failures.
pub struct RetryingClient<T, S = ThreadSleeper> {
    transport: T,
    policy: RetryPolicy,
    sleeper: S,
}

impl<T: ChatTransport> RetryingClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            sleeper: ThreadSleeper,
        }
    }
}

impl<T: ChatTransport, S: Sleeper> RetryingClient<T, S> {
    /// Replace the sleeper, e.g. with one that records waits.
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> RetryingClient<T, S2> {
        RetryingClient {
            transport: self.transport,
            policy: self.policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn run<R>(&self, what: &str, call: impl Fn() -> Result<R, ApiError>) -> Result<R, LlmError> {
        let mut attempt = 0;
        loop {
            let err = match call() {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", what, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(LlmError::Api(err));
            }

            let attempts = attempt + 1;
            if attempt >= self.policy.max_retries {
                return Err(match err {
                    ApiError::RateLimited(message) => {
                        LlmError::RateLimitExhausted { attempts, message }
                    }
                    source => LlmError::RetriesExhausted { attempts, source },
                });
            }

            let wait = self.policy.delay(attempt);
            warn!(
                "{} failed ({}), retry {}/{} in {:?}",
                what,
                err,
                attempts,
                self.policy.max_retries,
                wait
            );
            self.sleeper.sleep(wait);
            attempt += 1;
        }
    }
}

impl<T: ChatTransport, S: Sleeper> LanguageModel for RetryingClient<T, S> {
    fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.run("chat completion", || self.transport.send(request))
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        self.run("model listing", || self.transport.list_models())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelParams;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Transport that replays scripted outcomes, then keeps returning the last one.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<String, ApiError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<String, ApiError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn always(outcome: Result<String, ApiError>) -> Self {
            Self::new(vec![outcome])
        }

        fn next(&self) -> Result<String, ApiError> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn send(&self, _request: &ChatRequest) -> Result<String, ApiError> {
            self.next()
        }

        fn list_models(&self) -> Result<Vec<String>, ApiError> {
            self.next().map(|m| vec![m])
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            "system",
            "prompt",
            ModelParams {
                model: "gpt-5-nano".to_string(),
                temperature: 0.1,
                max_tokens: 1000,
            },
        )
    }

    fn client(
        transport: ScriptedTransport,
        max_retries: u32,
    ) -> (RetryingClient<ScriptedTransport, RecordingSleeper>, RecordingSleeper) {
        let sleeper = RecordingSleeper::default();
        let client = RetryingClient::new(
            transport,
            RetryPolicy::new(max_retries, Duration::from_secs(1)),
        )
        .with_sleeper(sleeper.clone());
        (client, sleeper)
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_success_without_retry() {
        let (client, sleeper) = client(ScriptedTransport::always(Ok("{}".to_string())), 3);

        assert_eq!(client.complete(&request()).unwrap(), "{}");
        assert!(sleeper.0.lock().unwrap().is_empty());
        assert_eq!(*client.transport.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_rate_limit_exhausts_retries() {
        let transport = ScriptedTransport::always(Err(ApiError::RateLimited("slow down".to_string())));
        let (client, sleeper) = client(transport, 3);

        let err = client.complete(&request()).unwrap_err();

        assert!(err.is_rate_limit());
        assert_eq!(err.attempts(), 4);
        assert_eq!(*client.transport.calls.lock().unwrap(), 4);

        let waits = sleeper.0.lock().unwrap().clone();
        assert_eq!(
            waits,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert!(waits.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            Err(ApiError::Unavailable {
                status: Some(503),
                message: "busy".to_string(),
            }),
            Err(ApiError::RateLimited("slow down".to_string())),
            Ok("done".to_string()),
        ]);
        let (client, sleeper) = client(transport, 3);

        assert_eq!(client.complete(&request()).unwrap(), "done");
        assert_eq!(sleeper.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_other_transient_failures_are_reported_as_such() {
        let transport = ScriptedTransport::always(Err(ApiError::Unavailable {
            status: None,
            message: "timed out".to_string(),
        }));
        let (client, _) = client(transport, 2);

        let err = client.complete(&request()).unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_non_transient_failure_is_not_retried() {
        let transport = ScriptedTransport::always(Err(ApiError::Auth("invalid key".to_string())));
        let (client, sleeper) = client(transport, 3);

        let err = client.complete(&request()).unwrap_err();

        assert!(matches!(err, LlmError::Api(ApiError::Auth(_))));
        assert_eq!(err.attempts(), 1);
        assert_eq!(*client.transport.calls.lock().unwrap(), 1);
        assert!(sleeper.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_retries() {
        let transport = ScriptedTransport::always(Err(ApiError::RateLimited(String::new())));
        let (client, sleeper) = client(transport, 0);

        let err = client.complete(&request()).unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert!(sleeper.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_list_models_goes_through_policy() {
        let transport = ScriptedTransport::new(vec![
            Err(ApiError::RateLimited(String::new())),
            Ok("gpt-5-nano".to_string()),
        ]);
        let (client, _) = client(transport, 1);

        assert_eq!(client.list_models().unwrap(), vec!["gpt-5-nano"]);
    }
}
