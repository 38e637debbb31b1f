//! Reduction of ordered policy results into one decision.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Decision, Effect, PermissionResult, PolicyOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    /// Any deny (applicable, or indeterminate falling back to deny) wins.
    DenyOverrides,
    /// Any permit (applicable, or indeterminate falling back to permit) wins.
    PermitOverrides,
    /// The first result that is not `NotApplicable` decides.
    FirstApplicable,
}

impl CombiningAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CombiningAlgorithm::DenyOverrides => "deny-overrides",
            CombiningAlgorithm::PermitOverrides => "permit-overrides",
            CombiningAlgorithm::FirstApplicable => "first-applicable",
        }
    }

    /// Combine results in load order. `default` applies when nothing decides.
    pub fn combine(self, outcomes: &[PolicyOutcome], default: Effect) -> Decision {
        let decided = match self {
            CombiningAlgorithm::DenyOverrides => overriding(outcomes, Effect::Deny),
            CombiningAlgorithm::PermitOverrides => overriding(outcomes, Effect::Permit),
            CombiningAlgorithm::FirstApplicable => outcomes
                .iter()
                .find_map(|o| o.result.effect().map(|effect| Decision::decided_by(o, effect))),
        };
        decided.unwrap_or_else(|| Decision::by_default(default))
    }
}

/// `winner` from any applicable or indeterminate result, else the other
/// effect from an applicable result only.
fn overriding(outcomes: &[PolicyOutcome], winner: Effect) -> Option<Decision> {
    if let Some(o) = outcomes.iter().find(|o| o.result.effect() == Some(winner)) {
        return Some(Decision::decided_by(o, winner));
    }
    outcomes.iter().find_map(|o| match o.result {
        PermissionResult::Applicable(effect) => Some(Decision::decided_by(o, effect)),
        _ => None,
    })
}

impl FromStr for CombiningAlgorithm {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "deny-overrides" => Ok(CombiningAlgorithm::DenyOverrides),
            "permit-overrides" => Ok(CombiningAlgorithm::PermitOverrides),
            "first-applicable" => Ok(CombiningAlgorithm::FirstApplicable),
            other => Err(AuthzError::InvalidPolicy(format!(
                "unknown combining algorithm `{other}` (expected deny-overrides, permit-overrides or first-applicable)"
            ))),
        }
    }
}

impl fmt::Display for CombiningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::PolicyRef;

    const ALL: [CombiningAlgorithm; 3] = [
        CombiningAlgorithm::DenyOverrides,
        CombiningAlgorithm::PermitOverrides,
        CombiningAlgorithm::FirstApplicable,
    ];

    fn outcomes(results: Vec<PermissionResult>) -> Vec<PolicyOutcome> {
        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| PolicyOutcome {
                policy: PolicyRef {
                    index,
                    name: format!("policy-{index}"),
                },
                result,
            })
            .collect()
    }

    fn mixed() -> Vec<PolicyOutcome> {
        outcomes(vec![
            PermissionResult::NotApplicable,
            PermissionResult::Applicable(Effect::Permit),
            PermissionResult::Applicable(Effect::Deny),
        ])
    }

    fn failed(effect: Effect) -> PermissionResult {
        PermissionResult::indeterminate(AuthzError::Condition("boom".into()), effect)
    }

    #[test]
    fn test_deny_overrides() {
        let d = CombiningAlgorithm::DenyOverrides.combine(&mixed(), Effect::Permit);
        assert_eq!(d.effect, Effect::Deny);
        assert_eq!(d.deciding_policy.unwrap().index, 2);
    }

    #[test]
    fn test_permit_overrides() {
        let d = CombiningAlgorithm::PermitOverrides.combine(&mixed(), Effect::Deny);
        assert_eq!(d.effect, Effect::Permit);
        assert_eq!(d.deciding_policy.unwrap().index, 1);
    }

    #[test]
    fn test_first_applicable() {
        let d = CombiningAlgorithm::FirstApplicable.combine(&mixed(), Effect::Deny);
        assert_eq!(d.effect, Effect::Permit);
        assert_eq!(d.deciding_policy.unwrap().name, "policy-1");
    }

    #[test]
    fn test_empty_and_not_applicable_yield_default() {
        let none = outcomes(vec![]);
        let silent = outcomes(vec![
            PermissionResult::NotApplicable,
            PermissionResult::NotApplicable,
        ]);
        for algorithm in ALL {
            for default in [Effect::Permit, Effect::Deny] {
                for set in [&none, &silent] {
                    let d = algorithm.combine(set, default);
                    assert_eq!(d, Decision::by_default(default));
                }
            }
        }
    }

    #[test]
    fn test_indeterminate_deny_under_deny_overrides() {
        let set = outcomes(vec![
            PermissionResult::Applicable(Effect::Permit),
            failed(Effect::Deny),
        ]);
        let d = CombiningAlgorithm::DenyOverrides.combine(&set, Effect::Permit);
        assert_eq!(d.effect, Effect::Deny);
        assert!(d.indeterminate);
        assert_eq!(d.deciding_policy.unwrap().index, 1);
    }

    #[test]
    fn test_indeterminate_permit_does_not_permit_under_deny_overrides() {
        let set = outcomes(vec![failed(Effect::Permit)]);
        let d = CombiningAlgorithm::DenyOverrides.combine(&set, Effect::Deny);
        assert_eq!(d, Decision::by_default(Effect::Deny));
    }

    #[test]
    fn test_indeterminate_permit_under_permit_overrides() {
        let set = outcomes(vec![
            PermissionResult::Applicable(Effect::Deny),
            failed(Effect::Permit),
        ]);
        let d = CombiningAlgorithm::PermitOverrides.combine(&set, Effect::Deny);
        assert_eq!(d.effect, Effect::Permit);
        assert!(d.indeterminate);
    }

    #[test]
    fn test_first_applicable_counts_indeterminate() {
        let set = outcomes(vec![
            PermissionResult::NotApplicable,
            failed(Effect::Deny),
            PermissionResult::Applicable(Effect::Permit),
        ]);
        let d = CombiningAlgorithm::FirstApplicable.combine(&set, Effect::Permit);
        assert_eq!(d.effect, Effect::Deny);
        assert_eq!(d.deciding_policy.unwrap().index, 1);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "deny-overrides".parse::<CombiningAlgorithm>().unwrap(),
            CombiningAlgorithm::DenyOverrides
        );
        assert_eq!(
            "PERMIT_OVERRIDES".parse::<CombiningAlgorithm>().unwrap(),
            CombiningAlgorithm::PermitOverrides
        );
        assert_eq!(
            "first_applicable".parse::<CombiningAlgorithm>().unwrap(),
            CombiningAlgorithm::FirstApplicable
        );
        assert!("majority".parse::<CombiningAlgorithm>().is_err());
        for algorithm in ALL {
            assert_eq!(algorithm.as_str().parse::<CombiningAlgorithm>().unwrap(), algorithm);
        }
    }
}
