//! Coordination configuration.

use crate::error::CoreError;
use crate::identifiers::DkgPhase;
use serde::{Deserialize, Serialize};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Deadlines and limits for one deployment.
///
/// The configuration in force when a round is created is snapshotted into
/// the round payload, so replaying a round's log reproduces the same
/// deadlines even after the node's configuration has changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// How long participants have to accept or decline the invitation.
    pub signature_proposal_deadline_secs: u64,
    /// Deadline for the commit confirmation phase, counted from phase entry.
    pub commit_deadline_secs: u64,
    /// Deadline for the deal confirmation phase.
    pub deal_deadline_secs: u64,
    /// Deadline for the response confirmation phase.
    pub response_deadline_secs: u64,
    /// Deadline for the master-key confirmation phase.
    pub master_key_deadline_secs: u64,
    /// Deadline for a signing session, confirmation through partials.
    pub signing_deadline_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            signature_proposal_deadline_secs: DAY_SECS,
            commit_deadline_secs: DAY_SECS,
            deal_deadline_secs: DAY_SECS,
            response_deadline_secs: DAY_SECS,
            master_key_deadline_secs: DAY_SECS,
            signing_deadline_secs: DAY_SECS,
        }
    }
}

impl CoordinationConfig {
    /// Reject configurations with a zero deadline anywhere.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fields = [
            ("signature_proposal_deadline_secs", self.signature_proposal_deadline_secs),
            ("commit_deadline_secs", self.commit_deadline_secs),
            ("deal_deadline_secs", self.deal_deadline_secs),
            ("response_deadline_secs", self.response_deadline_secs),
            ("master_key_deadline_secs", self.master_key_deadline_secs),
            ("signing_deadline_secs", self.signing_deadline_secs),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(CoreError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Confirmation deadline for one DKG phase.
    pub fn dkg_deadline_secs(&self, phase: DkgPhase) -> u64 {
        match phase {
            DkgPhase::Commits => self.commit_deadline_secs,
            DkgPhase::Deals => self.deal_deadline_secs,
            DkgPhase::Responses => self.response_deadline_secs,
            DkgPhase::MasterKey => self.master_key_deadline_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CoordinationConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let config = CoordinationConfig {
            deal_deadline_secs: 0,
            ..CoordinationConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("deal_deadline_secs"));
    }

    #[test]
    fn per_phase_lookup() {
        let config = CoordinationConfig {
            commit_deadline_secs: 1,
            deal_deadline_secs: 2,
            response_deadline_secs: 3,
            master_key_deadline_secs: 4,
            ..CoordinationConfig::default()
        };
        assert_eq!(config.dkg_deadline_secs(DkgPhase::Commits), 1);
        assert_eq!(config.dkg_deadline_secs(DkgPhase::Deals), 2);
        assert_eq!(config.dkg_deadline_secs(DkgPhase::Responses), 3);
        assert_eq!(config.dkg_deadline_secs(DkgPhase::MasterKey), 4);
    }
}
