use super::caller::GrantedPermissions;
use super::rule::{Operation, PermissionRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Fail,
}

impl Decision {
    pub fn is_pass(self) -> bool {
        matches!(self, Decision::Pass)
    }
}

impl From<bool> for Decision {
    fn from(value: bool) -> Self {
        if value {
            Decision::Pass
        } else {
            Decision::Fail
        }
    }
}

/// Policy evaluator trait for pluggable authorization logic
pub trait PolicyEvaluator: Send + Sync {
    /// Decide whether `granted` satisfies the rule that matched the request.
    fn evaluate(&self, rule: &PermissionRule, granted: &GrantedPermissions) -> Decision;
}

/// Default evaluator.
///
/// Evaluation order:
/// 1. master key held -> pass
/// 2. rule requires nothing -> pass
/// 3. `and` -> every requirement held
/// 4. `or` -> at least one requirement held
///
/// "Held" is substring containment in the comma-joined permission string.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicyEvaluator;

impl DefaultPolicyEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyEvaluator for DefaultPolicyEvaluator {
    fn evaluate(&self, rule: &PermissionRule, granted: &GrantedPermissions) -> Decision {
        if let Some(master_key) = rule.master_key() {
            if granted.contains(master_key) {
                tracing::debug!(url = %rule.url(), "master key bypass");
                return Decision::Pass;
            }
        }

        let required = rule.permissions();
        if required.is_empty() {
            return Decision::Pass;
        }

        let decision: Decision = match rule.operation() {
            Operation::And => required.iter().all(|p| granted.contains(p)),
            Operation::Or => required.iter().any(|p| granted.contains(p)),
        }
        .into();

        if decision == Decision::Fail {
            tracing::debug!(
                url = %rule.url(),
                operation = ?rule.operation(),
                required = ?required,
                "permission denied"
            );
        }

        decision
    }
}

/// Evaluate the rule matched for a request; no match is always a pass.
pub fn evaluate(
    evaluator: &dyn PolicyEvaluator,
    rule: Option<&PermissionRule>,
    granted: &GrantedPermissions,
) -> Decision {
    match rule {
        Some(rule) => evaluator.evaluate(rule, granted),
        None => Decision::Pass,
    }
}
