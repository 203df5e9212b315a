use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ActionOutput, AutomationError, BackendSession, BackendTier, BrowserAction, CapabilitySet,
    HealthState,
};
use crate::core::error::{ErrorKind, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorSettings {
    pub health_cooldown: Duration,
    pub action_timeout: Duration,
    pub init_timeout: Duration,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            health_cooldown: Duration::from_secs(300),
            action_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    SkippedUnavailable,
    InitFailed,
    CapabilityMismatch,
    ActionFailed,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TierAttempt {
    pub rank: u32,
    pub tier: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TierAttempt {
    fn new(tier: &BackendTier, outcome: AttemptOutcome, detail: Option<String>) -> Self {
        Self {
            rank: tier.rank,
            tier: tier.name.clone(),
            outcome,
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExecutionReport {
    pub actions_performed: usize,
    pub artifacts: Vec<String>,
    pub serviced_by_rank: u32,
    pub serviced_by: String,
    pub attempts: Vec<TierAttempt>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectorError {
    #[error("all automation backends exhausted after {} attempts", .attempts.len())]
    AllBackendsExhausted { attempts: Vec<TierAttempt> },
    #[error("no automation tiers configured")]
    NoTiers,
}

impl SelectorError {
    pub fn to_stage_error(&self) -> StageError {
        match self {
            SelectorError::AllBackendsExhausted { attempts } => {
                let trail = attempts
                    .iter()
                    .map(|a| match &a.detail {
                        Some(d) => format!("#{} {} {:?}: {}", a.rank, a.tier, a.outcome, d),
                        None => format!("#{} {} {:?}", a.rank, a.tier, a.outcome),
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                StageError::new(
                    ErrorKind::AllBackendsExhausted,
                    format!("{} ({})", self, trail),
                )
            }
            SelectorError::NoTiers => StageError::new(ErrorKind::BackendUnavailable, self.to_string()),
        }
    }
}

/// Runs an action list against the first tier able to complete it.
#[derive(Debug, Clone, Default)]
pub struct BackendSelector {
    settings: SelectorSettings,
}

impl BackendSelector {
    pub fn new(settings: SelectorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> SelectorSettings {
        self.settings
    }

    pub async fn execute(
        &self,
        actions: &[BrowserAction],
        tiers: &[BackendTier],
    ) -> Result<ExecutionReport, SelectorError> {
        if tiers.is_empty() {
            return Err(SelectorError::NoTiers);
        }

        let mut ordered: Vec<&BackendTier> = tiers.iter().collect();
        ordered.sort_by_key(|t| t.rank);

        let cooldown = self.settings.health_cooldown;
        let last_resort = ordered
            .iter()
            .all(|t| t.health(cooldown) == HealthState::Unavailable);
        if last_resort {
            warn!("Every automation tier is marked unavailable; trying all of them");
        }

        let required = BrowserAction::required(actions);
        let mut attempts = Vec::with_capacity(ordered.len());

        for tier in ordered {
            if !last_resort && tier.health(cooldown) == HealthState::Unavailable {
                debug!(tier = %tier.name, rank = tier.rank, "Skipping unavailable tier");
                attempts.push(TierAttempt::new(tier, AttemptOutcome::SkippedUnavailable, None));
                continue;
            }

            match self.try_tier(tier, actions, &required).await {
                Ok(artifacts) => {
                    tier.mark(HealthState::Healthy);
                    info!(tier = %tier.name, rank = tier.rank, "Automation serviced");
                    attempts.push(TierAttempt::new(tier, AttemptOutcome::Succeeded, None));
                    return Ok(ExecutionReport {
                        actions_performed: actions.len(),
                        artifacts,
                        serviced_by_rank: tier.rank,
                        serviced_by: tier.name.clone(),
                        attempts,
                    });
                }
                Err(attempt) => {
                    warn!(
                        tier = %tier.name,
                        rank = tier.rank,
                        outcome = ?attempt.outcome,
                        "Automation tier failed, falling back"
                    );
                    attempts.push(attempt);
                }
            }
        }

        Err(SelectorError::AllBackendsExhausted { attempts })
    }

    async fn try_tier(
        &self,
        tier: &BackendTier,
        actions: &[BrowserAction],
        required: &CapabilitySet,
    ) -> Result<Vec<String>, TierAttempt> {
        let mut session =
            match tokio::time::timeout(self.settings.init_timeout, tier.backend.init()).await {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => {
                    tier.mark(HealthState::Unavailable);
                    return Err(TierAttempt::new(
                        tier,
                        AttemptOutcome::InitFailed,
                        Some(e.to_string()),
                    ));
                }
                Err(_) => {
                    tier.mark(HealthState::Unavailable);
                    return Err(TierAttempt::new(
                        tier,
                        AttemptOutcome::InitFailed,
                        Some(format!(
                            "initialization exceeded {}s",
                            self.settings.init_timeout.as_secs_f32()
                        )),
                    ));
                }
            };

        let reported = session.capabilities();
        let missing: Vec<&str> = required
            .iter()
            .filter(|c| !tier.capabilities.contains(c) || !reported.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !missing.is_empty() {
            session.close().await;
            return Err(TierAttempt::new(
                tier,
                AttemptOutcome::CapabilityMismatch,
                Some(format!("missing {}", missing.join(", "))),
            ));
        }

        let mut artifacts = Vec::new();
        for (idx, action) in actions.iter().enumerate() {
            match self.perform_with_retry(session.as_mut(), action).await {
                Ok(output) => artifacts.extend(output.artifact),
                Err(e) => {
                    tier.mark(if e.is_unavailability() {
                        HealthState::Unavailable
                    } else {
                        HealthState::Degraded
                    });
                    session.close().await;
                    return Err(TierAttempt::new(
                        tier,
                        AttemptOutcome::ActionFailed,
                        Some(format!(
                            "step {} ({}): {}",
                            idx + 1,
                            action.capability().as_str(),
                            e
                        )),
                    ));
                }
            }
        }

        session.close().await;
        Ok(artifacts)
    }

    async fn perform_with_retry(
        &self,
        session: &mut dyn BackendSession,
        action: &BrowserAction,
    ) -> Result<ActionOutput, AutomationError> {
        match self.perform_once(session, action).await {
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Retrying transient automation failure");
                self.perform_once(session, action).await
            }
            other => other,
        }
    }

    async fn perform_once(
        &self,
        session: &mut dyn BackendSession,
        action: &BrowserAction,
    ) -> Result<ActionOutput, AutomationError> {
        match tokio::time::timeout(self.settings.action_timeout, session.perform(action)).await {
            Ok(result) => result,
            Err(_) => Err(AutomationError::Timeout(format!(
                "{} exceeded {}s",
                action.capability().as_str(),
                self.settings.action_timeout.as_secs_f32()
            ))),
        }
    }
}
