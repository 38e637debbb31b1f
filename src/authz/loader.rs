use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::authz::condition::ExpressionEvaluator;
use crate::authz::document::{parse_document, ParsedDocument, PointDef, PolicyDef};
use crate::authz::errors::AuthzError;
use crate::authz::point::{PointDefinition, PolicyLoader, PolicySet, NAMESPACE_DELIMITER};
use crate::authz::policy::{AuthorizationPolicy, ContextRequirement};
use crate::authz::resolver::{ConditionEvaluator, Directory, RoleResolver};
use crate::authz::selector::{GroupSelector, ObjectSelector, PolicyTarget, ResourceSelector, RoleSelector};
use crate::authz::types::{Effect, Identity};

/// All points, policies and directory entries from a set of policy documents.
/// Immutable after construction; changing documents requires a reload.
#[derive(Debug)]
pub struct PolicyCatalog {
    /// namespaced alias -> point, in declaration order
    points: Vec<(String, PointDef)>,
    /// namespaced alias -> policies in load order
    policies: HashMap<String, Vec<AuthorizationPolicy>>,
    directory: Arc<Directory>,
}

impl PolicyCatalog {
    /// Load all `.kdl` files from the given directory, in path order.
    pub fn load_dir(dir: &Path) -> Result<Self, AuthzError> {
        if !dir.is_dir() {
            return Err(AuthzError::InvalidPolicy(format!(
                "policies directory `{}` does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "kdl"))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in &paths {
            let contents =
                std::fs::read_to_string(path).map_err(|source| AuthzError::PolicyLoad {
                    path: path.display().to_string(),
                    source,
                })?;
            documents.push(parse_document(&contents)?);
        }

        let catalog = Self::compile(documents, &ExpressionEvaluator::new())?;

        tracing::info!(
            files = paths.len(),
            points = catalog.points.len(),
            policies = catalog.policy_count(),
            roles = catalog.directory.role_count(),
            users = catalog.directory.user_count(),
            "Loaded authorization policies"
        );

        Ok(catalog)
    }

    /// Merge parsed documents, validate them and build policies.
    pub fn compile(
        documents: Vec<ParsedDocument>,
        conditions: &dyn ConditionEvaluator,
    ) -> Result<Self, AuthzError> {
        let mut points: Vec<(String, PointDef)> = Vec::new();
        let mut policy_defs: Vec<PolicyDef> = Vec::new();
        let mut directory = Directory::new();
        let mut users = HashSet::new();
        let mut tokens = Vec::new();

        for doc in documents {
            for point in doc.points {
                let key = format!("{}{}{}", point.app, NAMESPACE_DELIMITER, point.alias);
                if points.iter().any(|(k, _)| *k == key) {
                    return Err(AuthzError::DuplicatePoint(key));
                }
                points.push((key, point));
            }
            policy_defs.extend(doc.policies);
            for role in doc.roles {
                directory.declare_role(role);
            }
            for user in doc.users {
                directory.add_user(user.name.clone());
                for role in user.roles {
                    directory.grant_role(user.name.clone(), role);
                }
                users.insert(user.name);
            }
            tokens.extend(doc.tokens);
            for object in doc.objects {
                directory.add_object(object.alias, object.extends);
            }
            for group in doc.groups {
                directory.declare_group(group.name.clone());
                for page in group.pages {
                    directory.add_page_to_group(group.name.clone(), page);
                }
            }
        }

        for token in tokens {
            if !users.contains(&token.user) {
                return Err(AuthzError::InvalidPolicy(format!(
                    "token `{}` refers to undeclared user `{}`",
                    token.token, token.user
                )));
            }
            directory.add_token(token.token, token.user);
        }

        let mut policies: HashMap<String, Vec<AuthorizationPolicy>> = HashMap::new();
        for def in policy_defs {
            if !points.iter().any(|(k, _)| *k == def.point) {
                return Err(AuthzError::UndefinedPoint(def.point));
            }
            let point = def.point.clone();
            let policy = build_policy(def, conditions)?;
            policies.entry(point).or_default().push(policy);
        }

        Ok(Self {
            points,
            policies,
            directory: Arc::new(directory),
        })
    }

    pub fn directory(&self) -> Arc<Directory> {
        self.directory.clone()
    }

    /// `(app, alias)` of every declared point, in declaration order.
    pub fn point_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.points
            .iter()
            .map(|(_, p)| (p.app.as_str(), p.alias.as_str()))
    }

    pub fn policy_count(&self) -> usize {
        self.policies.values().map(Vec::len).sum()
    }

    fn point(&self, namespaced: &str) -> Option<&PointDef> {
        self.points
            .iter()
            .find(|(k, _)| k == namespaced)
            .map(|(_, p)| p)
    }

    /// Whether `policy` belongs in the set cached for `principal`.
    ///
    /// Only permit policies for roles the principal does not hold are left
    /// out. Deny policies and undefined roles stay, so tokens are still checked
    /// by the role stage. The answer depends on the principal alone because
    /// that is all a cached set is keyed by.
    fn concerns(&self, principal: &str, policy: &AuthorizationPolicy) -> bool {
        let Some(role) = &policy.target().role else {
            return true;
        };
        if !policy.effect().is_permit() {
            return true;
        }
        self.directory.has_role(principal, role).unwrap_or(true)
    }
}

fn build_policy(
    def: PolicyDef,
    conditions: &dyn ConditionEvaluator,
) -> Result<AuthorizationPolicy, AuthzError> {
    let mut target = PolicyTarget::new();
    if let Some(role) = &def.role {
        target = target.with_role(RoleSelector::parse(role)?);
    }
    if let Some(resource) = &def.resource {
        target = target.with_resource(ResourceSelector::parse(resource)?);
    }
    if let Some(object) = &def.object {
        target = target.with_object(ObjectSelector::parse(object)?);
    }
    if let Some(group) = &def.group {
        target = target.with_group(GroupSelector::parse(group)?);
    }
    for excluded in &def.exclude {
        target = target.excluding(ResourceSelector::parse(excluded)?);
    }

    let mut policy = AuthorizationPolicy::new(def.name, def.effect.unwrap_or(Effect::Deny), target)
        .with_context_requirement(ContextRequirement::from_option(def.context_known));

    if let Some(source) = &def.condition {
        policy = policy.with_condition(conditions.compile(source)?);
    }

    Ok(policy)
}

impl PolicyLoader for PolicyCatalog {
    fn load_point(&self, point: &mut PointDefinition) -> Result<(), AuthzError> {
        let key = point.alias_with_namespace();
        let Some(def) = self.point(&key) else {
            return Err(AuthzError::UndefinedPoint(key));
        };
        point.uid = def.uid.clone();
        point.name = def.name.clone();
        point.active = def.active;
        point.combining = def.combining;
        point.default_effect = def.default_effect;
        Ok(())
    }

    fn load_policies(
        &self,
        point: &PointDefinition,
        identity: &Identity,
        set: &mut PolicySet,
    ) -> Result<(), AuthzError> {
        let key = point.alias_with_namespace();
        if self.point(&key).is_none() {
            return Err(AuthzError::UndefinedPoint(key));
        }
        let Some(policies) = self.policies.get(&key) else {
            return Ok(());
        };
        for policy in policies {
            if self.concerns(identity.principal_id(), policy) {
                set.add_policy(policy.clone());
            }
        }
        Ok(())
    }
}
