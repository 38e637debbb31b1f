//! Collaborators a policy consults while it is evaluated.
//!
//! They are injected into each [`AuthorizationPoint`](crate::authz::point::AuthorizationPoint)
//! so evaluation never reaches for global state. [`Directory`] is the
//! in-memory implementation built from policy documents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::authz::condition::{Condition, ExpressionEvaluator};
use crate::authz::errors::AuthzError;
use crate::authz::selector::{GroupSelector, ObjectSelector, RoleSelector};
use crate::authz::types::{Identity, Resource};

const MAX_HIERARCHY_DEPTH: usize = 32;

/// Dereferences identities to principals and answers role membership.
pub trait RoleResolver: Send + Sync {
    /// The username the identity acts as, following its token if it has one.
    fn resolve_principal(&self, identity: &Identity) -> Result<String, AuthzError>;

    fn has_role(&self, principal: &str, role: &RoleSelector) -> Result<bool, AuthzError>;
}

/// Answers "is-a" between object/class aliases.
pub trait ObjectHierarchyResolver: Send + Sync {
    fn is_a(&self, object: &str, ancestor: &ObjectSelector) -> Result<bool, AuthzError>;
}

/// Answers page group membership.
pub trait GroupResolver: Send + Sync {
    fn page_in_group(&self, page: &str, group: &GroupSelector) -> Result<bool, AuthzError>;
}

/// Everything a condition may look at.
#[derive(Debug, Clone, Copy)]
pub struct ConditionInput<'a> {
    pub identity: &'a Identity,
    pub resource: &'a Resource,
    pub context: &'a Value,
}

impl ConditionInput<'_> {
    /// JSON view of the request that condition paths are resolved against.
    pub fn to_document(&self) -> Value {
        json!({
            "principal": self.identity.principal_id(),
            "impersonation": self.identity.impersonation(),
            "resource": {
                "alias": self.resource.alias,
                "type": self.resource.type_name,
                "object": self.resource.object,
                "page": self.resource.origin.page,
                "widget_bound": self.resource.origin.widget_bound,
            },
            "context": self.context,
        })
    }
}

pub trait ConditionEvaluator: Send + Sync {
    /// Turn condition source into the form `evaluate` consumes. Called once at
    /// load time; a condition that can never be evaluated is rejected here.
    fn compile(&self, source: &str) -> Result<Condition, AuthzError>;

    fn evaluate(&self, condition: &Condition, input: &ConditionInput<'_>) -> Result<bool, AuthzError>;
}

/// The set of collaborators handed to every policy evaluation.
#[derive(Clone)]
pub struct Collaborators {
    pub roles: Arc<dyn RoleResolver>,
    pub objects: Arc<dyn ObjectHierarchyResolver>,
    pub groups: Arc<dyn GroupResolver>,
    pub conditions: Arc<dyn ConditionEvaluator>,
}

impl Collaborators {
    /// Use one directory for roles, objects and groups, with the default condition language.
    pub fn from_directory(directory: Arc<Directory>) -> Self {
        Self {
            roles: directory.clone(),
            objects: directory.clone(),
            groups: directory,
            conditions: Arc::new(ExpressionEvaluator::new()),
        }
    }

    pub fn with_conditions(mut self, conditions: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = conditions;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// In-memory users, tokens, roles, object hierarchy and page groups.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    /// username -> roles held
    user_roles: HashMap<String, HashSet<String>>,
    /// token -> username
    tokens: HashMap<String, String>,
    /// every role that is declared or granted
    roles: HashSet<String>,
    /// object -> parent object
    parents: HashMap<String, Option<String>>,
    /// group -> pages
    groups: HashMap<String, HashSet<String>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_role(&mut self, role: impl Into<String>) {
        self.roles.insert(role.into());
    }

    pub fn grant_role(&mut self, username: impl Into<String>, role: impl Into<String>) {
        let role = role.into();
        self.roles.insert(role.clone());
        self.user_roles
            .entry(username.into())
            .or_default()
            .insert(role);
    }

    pub fn add_user(&mut self, username: impl Into<String>) {
        self.user_roles.entry(username.into()).or_default();
    }

    pub fn add_token(&mut self, token: impl Into<String>, username: impl Into<String>) {
        self.tokens.insert(token.into(), username.into());
    }

    /// Declare an object, optionally extending a parent. The parent is declared implicitly.
    pub fn add_object(&mut self, object: impl Into<String>, extends: Option<String>) {
        if let Some(parent) = &extends {
            self.parents.entry(parent.clone()).or_insert(None);
        }
        self.parents.insert(object.into(), extends);
    }

    pub fn add_page_to_group(&mut self, group: impl Into<String>, page: impl Into<String>) {
        self.groups.entry(group.into()).or_default().insert(page.into());
    }

    pub fn declare_group(&mut self, group: impl Into<String>) {
        self.groups.entry(group.into()).or_default();
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn user_count(&self) -> usize {
        self.user_roles.len()
    }
}

impl RoleResolver for Directory {
    fn resolve_principal(&self, identity: &Identity) -> Result<String, AuthzError> {
        let Some(token) = identity.auth_token() else {
            return Ok(identity.username().to_string());
        };
        let owner = self
            .tokens
            .get(token)
            .ok_or_else(|| AuthzError::UnknownToken(token.to_string()))?;
        if owner != identity.username() {
            return Err(AuthzError::TokenMismatch {
                token: token.to_string(),
                username: identity.username().to_string(),
            });
        }
        Ok(owner.clone())
    }

    fn has_role(&self, principal: &str, role: &RoleSelector) -> Result<bool, AuthzError> {
        if !self.roles.contains(role.as_str()) {
            return Err(AuthzError::UndefinedRole(role.to_string()));
        }
        Ok(self
            .user_roles
            .get(principal)
            .is_some_and(|roles| roles.contains(role.as_str())))
    }
}

impl ObjectHierarchyResolver for Directory {
    fn is_a(&self, object: &str, ancestor: &ObjectSelector) -> Result<bool, AuthzError> {
        if !self.parents.contains_key(ancestor.as_str()) {
            return Err(AuthzError::UndefinedObject(ancestor.to_string()));
        }
        let mut current = object;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            if current == ancestor.as_str() {
                return Ok(true);
            }
            match self.parents.get(current) {
                Some(Some(parent)) => current = parent,
                Some(None) => return Ok(false),
                None => return Err(AuthzError::UndefinedObject(current.to_string())),
            }
        }
        // Cyclic or absurdly deep hierarchy.
        Ok(false)
    }
}

impl GroupResolver for Directory {
    fn page_in_group(&self, page: &str, group: &GroupSelector) -> Result<bool, AuthzError> {
        self.groups
            .get(group.as_str())
            .map(|pages| pages.contains(page))
            .ok_or_else(|| AuthzError::UndefinedGroup(group.to_string()))
    }
}
