use serde_json::Value;

use crate::authz::condition::Condition;
use crate::authz::errors::AuthzError;
use crate::authz::resolver::{Collaborators, ConditionInput};
use crate::authz::selector::PolicyTarget;
use crate::authz::types::{Effect, Identity, PermissionResult, Resource};

/// Whether a policy only applies to resources invoked from a known page or widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextRequirement {
    #[default]
    Any,
    Known,
    Unknown,
}

impl ContextRequirement {
    pub fn from_option(required: Option<bool>) -> Self {
        match required {
            None => ContextRequirement::Any,
            Some(true) => ContextRequirement::Known,
            Some(false) => ContextRequirement::Unknown,
        }
    }

    fn accepts(self, known: bool) -> bool {
        match self {
            ContextRequirement::Any => true,
            ContextRequirement::Known => known,
            ContextRequirement::Unknown => !known,
        }
    }
}

/// A single access rule. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationPolicy {
    name: String,
    target: PolicyTarget,
    condition: Option<Condition>,
    effect: Effect,
    context: ContextRequirement,
}

/// Result of a single pipeline stage: `false` means the policy does not apply.
type Stage = Result<bool, AuthzError>;

impl AuthorizationPolicy {
    pub fn new(name: impl Into<String>, effect: Effect, target: PolicyTarget) -> Self {
        Self {
            name: name.into(),
            target,
            condition: None,
            effect,
            context: ContextRequirement::Any,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_context_requirement(mut self, requirement: ContextRequirement) -> Self {
        self.context = requirement;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn target(&self) -> &PolicyTarget {
        &self.target
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn context_requirement(&self) -> ContextRequirement {
        self.context
    }

    /// Match this policy against a request.
    ///
    /// Stages run in order and the first miss yields `NotApplicable`. Any
    /// error along the way becomes `Indeterminate` carrying this policy's
    /// effect; evaluation never fails outright.
    pub fn evaluate(
        &self,
        identity: &Identity,
        resource: &Resource,
        context: &Value,
        collaborators: &Collaborators,
    ) -> PermissionResult {
        match self.run_stages(identity, resource, context, collaborators) {
            Ok(true) => PermissionResult::Applicable(self.effect),
            Ok(false) => PermissionResult::NotApplicable,
            Err(error) => {
                tracing::warn!(
                    policy = %self.name,
                    principal = %identity.principal_id(),
                    resource = %resource.alias,
                    error = %error,
                    "policy evaluation is indeterminate"
                );
                PermissionResult::indeterminate(error, self.effect)
            }
        }
    }

    fn run_stages(
        &self,
        identity: &Identity,
        resource: &Resource,
        context: &Value,
        collaborators: &Collaborators,
    ) -> Stage {
        if !self.match_resource(resource)? {
            return self.miss("resource");
        }
        if !self.match_role(identity, collaborators)? {
            return self.miss("role");
        }
        if !self.match_context(resource)? {
            return self.miss("context");
        }
        if !self.match_object(resource, collaborators)? {
            return self.miss("object");
        }
        if !self.match_group(resource, collaborators)? {
            return self.miss("group");
        }
        if self.target.is_excluded(resource) {
            return self.miss("exclude");
        }
        if !self.match_condition(identity, resource, context, collaborators)? {
            return self.miss("condition");
        }
        Ok(true)
    }

    fn miss(&self, stage: &'static str) -> Stage {
        tracing::debug!(policy = %self.name, stage, "policy not applicable");
        Ok(false)
    }

    fn match_resource(&self, resource: &Resource) -> Stage {
        Ok(self
            .target
            .resource
            .as_ref()
            .map_or(true, |selector| selector.matches(resource)))
    }

    fn match_role(&self, identity: &Identity, collaborators: &Collaborators) -> Stage {
        let Some(role) = &self.target.role else {
            return Ok(true);
        };
        let principal = collaborators.roles.resolve_principal(identity)?;
        collaborators.roles.has_role(&principal, role)
    }

    fn match_context(&self, resource: &Resource) -> Stage {
        Ok(self.context.accepts(resource.origin.is_known()))
    }

    fn match_object(&self, resource: &Resource, collaborators: &Collaborators) -> Stage {
        let Some(selector) = &self.target.object else {
            return Ok(true);
        };
        let object = resource
            .object
            .as_deref()
            .ok_or_else(|| AuthzError::MissingObject(resource.alias.clone()))?;
        collaborators.objects.is_a(object, selector)
    }

    fn match_group(&self, resource: &Resource, collaborators: &Collaborators) -> Stage {
        let Some(group) = &self.target.group else {
            return Ok(true);
        };
        match resource.origin.page.as_deref() {
            Some(page) => collaborators.groups.page_in_group(page, group),
            None => Ok(false),
        }
    }

    fn match_condition(
        &self,
        identity: &Identity,
        resource: &Resource,
        context: &Value,
        collaborators: &Collaborators,
    ) -> Stage {
        let Some(condition) = &self.condition else {
            return Ok(true);
        };
        let input = ConditionInput {
            identity,
            resource,
            context,
        };
        collaborators.conditions.evaluate(condition, &input)
    }
}
