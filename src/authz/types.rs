use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::authz::combining::CombiningAlgorithm;
use crate::authz::errors::AuthzError;
use crate::authz::point::PointDefinition;

/// The access outcome a policy asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Permit,
    Deny,
}

impl Effect {
    pub fn is_permit(self) -> bool {
        matches!(self, Effect::Permit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Permit => "permit",
            Effect::Deny => "deny",
        }
    }
}

impl FromStr for Effect {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permit" | "allow" => Ok(Effect::Permit),
            "deny" => Ok(Effect::Deny),
            other => Err(AuthzError::InvalidPolicy(format!(
                "unknown effect `{other}` (expected \"permit\" or \"deny\")"
            ))),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting principal: a user, optionally authenticated through a token
/// and optionally impersonating along a chain of other users.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    username: String,
    token: Option<String>,
    impersonation: Vec<String>,
}

impl Identity {
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: None,
            impersonation: Vec::new(),
        }
    }

    /// An identity established through an authentication token issued to `username`.
    pub fn token(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: Some(token.into()),
            impersonation: Vec::new(),
        }
    }

    pub fn impersonating(mut self, chain: impl IntoIterator<Item = String>) -> Self {
        self.impersonation = chain.into_iter().collect();
        self
    }

    /// Principal identifier; two identities with equal ids share a policy cache entry.
    pub fn principal_id(&self) -> &str {
        &self.username
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn impersonation(&self) -> &[String] {
        &self.impersonation
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)?;
        for via in &self.impersonation {
            write!(f, " via {via}")?;
        }
        Ok(())
    }
}

/// Where a resource was invoked from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Page the request was triggered on, or the page of the widget the
    /// resource is defined in.
    #[serde(default)]
    pub page: Option<String>,
    /// Whether the resource is declared as part of a display element.
    #[serde(default)]
    pub widget_bound: bool,
}

impl Origin {
    pub fn is_known(&self) -> bool {
        self.page.is_some() || self.widget_bound
    }
}

/// Description of the thing access is requested to, e.g. an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Namespaced alias, e.g. `exface.Core.DeleteObject`.
    pub alias: String,
    /// Fully-qualified implementing type, e.g. `exface\Core\Actions\DeleteObject`.
    pub type_name: String,
    /// Object/class the resource operates on, if any.
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub origin: Origin,
}

impl Resource {
    pub fn new(alias: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            type_name: type_name.into(),
            object: None,
            origin: Origin::default(),
        }
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn on_page(mut self, page: impl Into<String>) -> Self {
        self.origin.page = Some(page.into());
        self
    }

    pub fn widget_bound(mut self) -> Self {
        self.origin.widget_bound = true;
        self
    }
}

/// Outcome of evaluating a single policy.
#[derive(Debug)]
pub enum PermissionResult {
    Applicable(Effect),
    NotApplicable,
    /// Evaluation failed; the policy resolves to its configured effect.
    Indeterminate { error: Box<AuthzError>, effect: Effect },
}

impl PermissionResult {
    pub fn indeterminate(error: AuthzError, effect: Effect) -> Self {
        PermissionResult::Indeterminate {
            error: Box::new(error),
            effect,
        }
    }

    /// The effect this result contributes, if any.
    pub fn effect(&self) -> Option<Effect> {
        match self {
            PermissionResult::Applicable(effect) => Some(*effect),
            PermissionResult::Indeterminate { effect, .. } => Some(*effect),
            PermissionResult::NotApplicable => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, PermissionResult::Indeterminate { .. })
    }
}

/// Position and name of a policy within its point's loaded set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PolicyRef {
    pub index: usize,
    pub name: String,
}

/// A policy's result, tagged with the policy it came from.
#[derive(Debug)]
pub struct PolicyOutcome {
    pub policy: PolicyRef,
    pub result: PermissionResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub effect: Effect,
    /// Policy that determined the effect; `None` when the default applied.
    pub deciding_policy: Option<PolicyRef>,
    /// Whether the deciding result was indeterminate.
    pub indeterminate: bool,
}

impl Decision {
    pub fn by_default(effect: Effect) -> Self {
        Self {
            effect,
            deciding_policy: None,
            indeterminate: false,
        }
    }

    pub(crate) fn decided_by(outcome: &PolicyOutcome, effect: Effect) -> Self {
        Self {
            effect,
            deciding_policy: Some(outcome.policy.clone()),
            indeterminate: outcome.result.is_indeterminate(),
        }
    }

    pub fn is_permitted(&self) -> bool {
        self.effect.is_permit()
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    /// Namespaced point alias, e.g. "exface.Core.action-access"
    pub point: String,
    /// e.g. "alice"
    pub principal: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub impersonation: Vec<String>,
    pub resource: Resource,
    /// Optional context for condition evaluation
    #[serde(default)]
    pub context: serde_json::Value,
}

impl DecideRequest {
    pub fn identity(&self) -> Identity {
        let identity = match &self.token {
            Some(token) => Identity::token(token.clone(), self.principal.clone()),
            None => Identity::user(self.principal.clone()),
        };
        identity.impersonating(self.impersonation.iter().cloned())
    }
}

#[derive(Debug, Serialize)]
pub struct DecideResponse {
    pub effect: Effect,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl From<Decision> for DecideResponse {
    fn from(decision: Decision) -> Self {
        Self {
            effect: decision.effect,
            allowed: decision.is_permitted(),
            policy: decision.deciding_policy.map(|p| p.name),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PoliciesQuery {
    pub principal: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PoliciesResponse {
    pub point: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PointSummary {
    /// Namespaced alias
    pub alias: String,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub active: bool,
    pub combining: CombiningAlgorithm,
    pub default_effect: Effect,
}

impl From<&PointDefinition> for PointSummary {
    fn from(point: &PointDefinition) -> Self {
        Self {
            alias: point.alias_with_namespace(),
            name: point.name.clone(),
            uid: point.uid.clone(),
            active: point.active,
            combining: point.combining,
            default_effect: point.default_effect,
        }
    }
}
