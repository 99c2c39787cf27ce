//! Bounded retry with exponential backoff.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::channel::ChannelClient;
use crate::config::DeliveryConfig;

use super::{AttemptResult, SendRequest};

/// Runs one channel round: up to `max_attempts` calls against a single
/// client, backing off between failures. Terminal errors stop the round
/// immediately; repeating a send the provider already rejected for shape
/// cannot change the answer.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    base_delay: Duration,
    max_delay: Duration,
}

/// The attempts produced by one round, in order.
#[derive(Debug)]
pub struct RetryRound {
    pub attempts: Vec<AttemptResult>,
}

impl RetryRound {
    /// Whether the round ended in a delivered attempt.
    pub fn succeeded(&self) -> bool {
        self.attempts.last().is_some_and(|a| a.success)
    }
}

impl RetryExecutor {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.base_delay, config.max_delay)
    }

    /// Backoff before retrying after the n-th failed attempt: doubles per
    /// failure from the base delay, capped at the ceiling.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        // exponent bounded so the shift stays in range
        let exp = failed_attempts.saturating_sub(1).min(16);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(2u64.pow(exp));
        Duration::from_millis(millis.min(self.max_delay.as_millis() as u64))
    }

    /// Attempt the request against one client until it succeeds, hits a
    /// terminal error, or exhausts the budget.
    pub async fn execute(
        &self,
        client: &dyn ChannelClient,
        request: &SendRequest,
        max_attempts: u32,
    ) -> RetryRound {
        let budget = max_attempts.max(1);
        let mut attempts = Vec::with_capacity(budget as usize);

        for attempt in 1..=budget {
            let started = Instant::now();
            let result = client.send(request).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    debug!(
                        channel = %client.kind(),
                        attempt,
                        message_id = %response.message_id,
                        latency_ms,
                        "attempt delivered"
                    );
                    attempts.push(AttemptResult::delivered(
                        client.kind(),
                        attempt,
                        response.message_id,
                        latency_ms,
                    ));
                    break;
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    warn!(
                        channel = %client.kind(),
                        attempt,
                        error = %error,
                        kind = %error.kind(),
                        retryable,
                        "attempt failed"
                    );
                    attempts.push(AttemptResult::failed(
                        client.kind(),
                        attempt,
                        &error,
                        latency_ms,
                    ));

                    if !retryable {
                        break;
                    }
                    if attempt < budget {
                        let delay = self.backoff_delay(attempt);
                        debug!(
                            channel = %client.kind(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        RetryRound { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, ErrorKind, MockClient};

    fn executor() -> RetryExecutor {
        RetryExecutor::new(Duration::from_millis(1), Duration::from_millis(50))
    }

    fn text_request() -> SendRequest {
        SendRequest::Text {
            recipients: vec!["9876543210".into()],
            template: "welcome".into(),
            parameters: vec![],
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let executor = RetryExecutor::new(Duration::from_millis(200), Duration::from_secs(5));
        assert_eq!(executor.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(executor.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(executor.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(executor.backoff_delay(4), Duration::from_millis(1600));
        assert_eq!(executor.backoff_delay(5), Duration::from_millis(3200));
        // Capped from here on
        assert_eq!(executor.backoff_delay(6), Duration::from_secs(5));
        assert_eq!(executor.backoff_delay(20), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let mock = MockClient::success(ChannelKind::Whatsapp);
        let round = executor().execute(&mock, &text_request(), 3).await;

        assert!(round.succeeded());
        assert_eq!(round.attempts.len(), 1);
        assert_eq!(mock.sends(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failures_exhaust_budget() {
        let mock = MockClient::failing(ChannelKind::Whatsapp, ErrorKind::ApiFailure);
        let round = executor().execute(&mock, &text_request(), 3).await;

        assert!(!round.succeeded());
        assert_eq!(round.attempts.len(), 3);
        assert!(round
            .attempts
            .iter()
            .all(|a| a.error_kind == Some(ErrorKind::ApiFailure)));
    }

    #[tokio::test]
    async fn test_terminal_error_stops_round() {
        let mock = MockClient::failing(ChannelKind::Whatsapp, ErrorKind::InvalidTemplate);
        let round = executor().execute(&mock, &text_request(), 3).await;

        assert!(!round.succeeded());
        assert_eq!(round.attempts.len(), 1);
        assert_eq!(round.attempts[0].error_kind, Some(ErrorKind::InvalidTemplate));
    }

    #[tokio::test]
    async fn test_malformed_phone_makes_exactly_one_attempt() {
        let mock = MockClient::success(ChannelKind::Whatsapp);
        let request = SendRequest::Text {
            recipients: vec!["12345".into()],
            template: "welcome".into(),
            parameters: vec![],
        };
        let round = executor().execute(&mock, &request, 5).await;

        assert_eq!(round.attempts.len(), 1);
        assert_eq!(round.attempts[0].error_kind, Some(ErrorKind::InvalidPhone));
    }

    #[tokio::test]
    async fn test_recovery_mid_round() {
        let mock = MockClient::success(ChannelKind::Whatsapp);
        mock.fail_next(2, ErrorKind::Timeout);

        let round = executor().execute(&mock, &text_request(), 3).await;
        assert!(round.succeeded());
        assert_eq!(round.attempts.len(), 3);
        assert_eq!(round.attempts[2].attempt, 3);
    }

    #[tokio::test]
    async fn test_zero_budget_still_tries_once() {
        let mock = MockClient::success(ChannelKind::Whatsapp);
        let round = executor().execute(&mock, &text_request(), 0).await;
        assert_eq!(round.attempts.len(), 1);
    }
}
