//! Freshness, replay and correlation checking

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::binding::request::ProtocolRequest;
use crate::error::SamlError;
use crate::policy::{PolicyTarget, SecurityPolicy, SecurityPolicyRule};

pub const MESSAGEFLOW_POLICY_RULE: &str = "MessageFlow";

fn default_true() -> bool {
    true
}

fn default_expires() -> u64 {
    60
}

/// Configuration of the message flow rule.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageFlowConfig {
    #[serde(default = "default_true")]
    pub check_replay: bool,
    #[serde(default)]
    pub check_correlation: bool,
    #[serde(default)]
    pub block_unsolicited: bool,
    /// Messages must have been issued no more than this many seconds ago.
    #[serde(default = "default_expires")]
    pub expires_secs: u64,
}

impl Default for MessageFlowConfig {
    fn default() -> Self {
        Self {
            check_replay: true,
            check_correlation: false,
            block_unsolicited: false,
            expires_secs: default_expires(),
        }
    }
}

/// Replay and freshness checking rule, with optional request/response
/// correlation enforcement.
pub struct MessageFlowRule {
    check_replay: bool,
    correlation: bool,
    block_unsolicited: bool,
    expires: Duration,
}

impl MessageFlowRule {
    pub fn new(config: MessageFlowConfig) -> Self {
        let mut correlation = config.check_correlation;
        if config.block_unsolicited && !correlation {
            correlation = true;
            tracing::info!(
                "enabling request/response correlation checking to block unsolicited responses"
            );
        }
        Self {
            check_replay: config.check_replay,
            correlation,
            block_unsolicited: config.block_unsolicited,
            expires: Duration::seconds(config.expires_secs as i64),
        }
    }
}

impl Default for MessageFlowRule {
    fn default() -> Self {
        Self::new(MessageFlowConfig::default())
    }
}

#[async_trait]
impl SecurityPolicyRule for MessageFlowRule {
    fn rule_type(&self) -> &'static str {
        MESSAGEFLOW_POLICY_RULE
    }

    async fn evaluate(
        &self,
        target: PolicyTarget<'_>,
        _request: Option<&(dyn ProtocolRequest + '_)>,
        policy: &mut SecurityPolicy,
    ) -> Result<bool, SamlError> {
        if target.message().is_none() {
            return Ok(false);
        }

        debug!(
            correlation = self.correlation,
            replay = self.check_replay,
            expiration = self.expires.num_seconds(),
            "evaluating message flow policy"
        );

        let now = policy.time();
        let skew = policy.clock_skew();
        let issue_instant = policy.issue_instant();

        if let Some(instant) = issue_instant {
            // Whole-second (epoch) comparison; fractional digits in the
            // instant must not tip the window boundaries.
            let timestamp = instant.timestamp();
            let newest_allowed = (now + skew).timestamp();
            let oldest_allowed = (now - skew - self.expires).timestamp();
            if timestamp > newest_allowed {
                warn!(timestamp, newest_allowed, "rejected not-yet-valid message");
                return Err(SamlError::SecurityPolicy(
                    "Message rejected, was issued in the future.".to_string(),
                ));
            }
            if timestamp < oldest_allowed {
                warn!(timestamp, oldest_allowed, "rejected expired message");
                return Err(SamlError::SecurityPolicy(
                    "Message expired, was issued too long ago.".to_string(),
                ));
            }
        }

        if self.correlation {
            if let Some(correlation_id) = policy.correlation_id().map(str::to_string) {
                if policy.in_response_to() == Some(correlation_id.as_str()) {
                    debug!("request/response correlation validated");
                } else {
                    warn!(request_id = %correlation_id, "response correlation ID did not match request ID");
                    return Err(SamlError::SecurityPolicy(
                        "Rejecting non-correlated response to request ID.".to_string(),
                    ));
                }
            } else if policy.in_response_to().is_some() {
                warn!("request/response correlation failed due to lack of request ID to compare");
                return Err(SamlError::SecurityPolicy(
                    "Response correlation failed with lack of correlation ID".to_string(),
                ));
            } else if self.block_unsolicited {
                warn!("unsolicited response rejected by policy");
                return Err(SamlError::SecurityPolicy(
                    "Unsolicited response rejected by policy".to_string(),
                ));
            }
        } else {
            debug!("ignoring InResponseTo, correlation checking is disabled");
        }

        if self.check_replay {
            let Some(id) = policy.message_id().map(str::to_string) else {
                return Ok(false);
            };
            let Some(cache) = policy.replay_cache() else {
                warn!("no replay cache available, skipping requested replay check");
                return Ok(false);
            };

            let expires = issue_instant.unwrap_or(now) + skew + self.expires;
            if !cache.check("MessageFlow", &id, expires) {
                error!(message_id = %id, "replay detected of message ID");
                return Err(SamlError::SecurityPolicy(format!(
                    "Rejecting replayed message ID ({}).",
                    id
                )));
            }
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::saml::{Response, SamlMessage};
    use crate::replay::InMemoryReplayCache;
    use chrono::Utc;
    use std::sync::Arc;

    fn policy_with_cache() -> SecurityPolicy {
        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy.set_replay_cache(Arc::new(InMemoryReplayCache::new()));
        policy.set_clock_skew(Duration::seconds(30));
        policy
    }

    fn message() -> SamlMessage {
        SamlMessage::Response(Response {
            id: "_m1".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_fresh_message_accepted_and_replay_rejected() {
        let rule = MessageFlowRule::default();
        let mut policy = policy_with_cache();
        let msg = message();

        policy.set_message_id(Some("_m1".to_string()));
        policy.set_issue_instant(Some(Utc::now()));
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap());

        // Second evaluation of the same ID is a deterministic replay.
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("replayed message ID (_m1)"));
    }

    #[tokio::test]
    async fn test_future_message_rejected() {
        let rule = MessageFlowRule::default();
        let mut policy = policy_with_cache();
        let msg = message();

        policy.set_message_id(Some("_m2".to_string()));
        policy.set_issue_instant(Some(Utc::now() + Duration::seconds(120)));
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("issued in the future"));
    }

    #[tokio::test]
    async fn test_stale_message_rejected() {
        let rule = MessageFlowRule::default();
        let mut policy = policy_with_cache();
        let msg = message();

        policy.set_message_id(Some("_m3".to_string()));
        policy.set_issue_instant(Some(Utc::now() - Duration::seconds(300)));
        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("issued too long ago"));
    }

    #[tokio::test]
    async fn test_freshness_window_boundaries() {
        // Accepted anywhere within [now - skew - expires, now + skew].
        let rule = MessageFlowRule::new(MessageFlowConfig {
            check_replay: false,
            ..Default::default()
        });
        let msg = message();

        for offset in [-85i64, -60, 0, 25] {
            let mut policy = policy_with_cache();
            policy.set_issue_instant(Some(Utc::now() + Duration::seconds(offset)));
            assert!(rule
                .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn test_correlation_mismatch() {
        let rule = MessageFlowRule::new(MessageFlowConfig {
            check_replay: false,
            check_correlation: true,
            ..Default::default()
        });
        let msg = message();
        let mut policy = policy_with_cache();
        policy.set_correlation_id(Some("_req1".to_string()));
        policy.set_in_response_to(Some("_other".to_string()));

        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-correlated"));

        policy.set_in_response_to(Some("_req1".to_string()));
        assert!(rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unsolicited_blocked() {
        let rule = MessageFlowRule::new(MessageFlowConfig {
            check_replay: false,
            block_unsolicited: true,
            ..Default::default()
        });
        let msg = message();
        let mut policy = policy_with_cache();

        let err = rule
            .evaluate(PolicyTarget::Message(&msg), None, &mut policy)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsolicited response rejected"));
    }
}
