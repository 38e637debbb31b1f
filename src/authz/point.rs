//! Enforcement points.
//!
//! An [`AuthorizationPoint`] caches the policy set it loaded for the last
//! principal it decided for. Sets are immutable once published: a reload or
//! [`AuthorizationPoint::add_policy`] builds a new set and swaps the `Arc`, so
//! evaluations already holding the old set are unaffected. Reloads are
//! serialized by a per-point lock.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::authz::combining::CombiningAlgorithm;
use crate::authz::errors::AuthzError;
use crate::authz::policy::AuthorizationPolicy;
use crate::authz::resolver::Collaborators;
use crate::authz::types::{Decision, Effect, Identity, PolicyOutcome, PolicyRef, Resource};

pub const NAMESPACE_DELIMITER: char = '.';

/// Point-level metadata, filled in by [`PolicyLoader::load_point`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointDefinition {
    pub app: String,
    pub alias: String,
    pub uid: Option<String>,
    pub name: Option<String>,
    pub active: bool,
    pub combining: CombiningAlgorithm,
    pub default_effect: Effect,
}

impl PointDefinition {
    /// A point as it is before its metadata is loaded: active, deny-overrides, deny by default.
    pub fn new(app: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            alias: alias.into(),
            uid: None,
            name: None,
            active: true,
            combining: CombiningAlgorithm::DenyOverrides,
            default_effect: Effect::Deny,
        }
    }

    pub fn alias_with_namespace(&self) -> String {
        format!("{}{}{}", self.app, NAMESPACE_DELIMITER, self.alias)
    }
}

/// Supplies point metadata and policies. Failures here abort a decision.
pub trait PolicyLoader: Send + Sync {
    fn load_point(&self, point: &mut PointDefinition) -> Result<(), AuthzError>;

    /// Add the policies of `point` that concern `identity` to `set`, in evaluation order.
    fn load_policies(
        &self,
        point: &PointDefinition,
        identity: &Identity,
        set: &mut PolicySet,
    ) -> Result<(), AuthzError>;
}

/// The ordered policies loaded for one principal.
#[derive(Debug, Clone)]
pub struct PolicySet {
    principal: String,
    policies: Vec<Arc<AuthorizationPolicy>>,
}

impl PolicySet {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            policies: Vec::new(),
        }
    }

    pub fn add_policy(&mut self, policy: AuthorizationPolicy) -> &mut Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn policies(&self) -> &[Arc<AuthorizationPolicy>] {
        &self.policies
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    fn is_loaded_for(&self, identity: &Identity) -> bool {
        self.principal == identity.principal_id()
    }
}

/// What a single decision is reported as.
#[derive(Debug, Clone, Copy)]
pub struct AuditRecord<'a> {
    pub point: &'a str,
    pub principal: &'a str,
    pub resource: &'a str,
    pub decision: &'a Decision,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord<'_>);
}

/// Emits each decision as a `tracing` event on the `tollgate::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord<'_>) {
        tracing::info!(
            target: "tollgate::audit",
            point = %record.point,
            principal = %record.principal,
            resource = %record.resource,
            effect = %record.decision.effect,
            policy = record.decision.deciding_policy.as_ref().map(|p| p.name.as_str()),
            indeterminate = record.decision.indeterminate,
            "authorization decision"
        );
    }
}

pub struct AuthorizationPoint {
    definition: PointDefinition,
    namespaced_alias: String,
    loader: Arc<dyn PolicyLoader>,
    collaborators: Collaborators,
    audit: Arc<dyn AuditSink>,
    cache: RwLock<Option<Arc<PolicySet>>>,
    reload: Mutex<()>,
}

impl std::fmt::Debug for AuthorizationPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationPoint")
            .field("definition", &self.definition)
            .field("loaded_for", &self.cache.read().as_ref().map(|s| s.principal.clone()))
            .finish_non_exhaustive()
    }
}

impl AuthorizationPoint {
    /// Create a point and load its metadata. A metadata load failure is returned as is.
    pub fn new(
        app: impl Into<String>,
        alias: impl Into<String>,
        loader: Arc<dyn PolicyLoader>,
        collaborators: Collaborators,
    ) -> Result<Self, AuthzError> {
        let mut definition = PointDefinition::new(app, alias);
        loader.load_point(&mut definition)?;
        let namespaced_alias = definition.alias_with_namespace();
        tracing::debug!(
            point = %namespaced_alias,
            active = definition.active,
            combining = %definition.combining,
            default_effect = %definition.default_effect,
            "Loaded authorization point"
        );
        Ok(Self {
            definition,
            namespaced_alias,
            loader,
            collaborators,
            audit: Arc::new(TracingAuditSink),
            cache: RwLock::new(None),
            reload: Mutex::new(()),
        })
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn definition(&self) -> &PointDefinition {
        &self.definition
    }

    pub fn alias_with_namespace(&self) -> &str {
        &self.namespaced_alias
    }

    pub fn is_active(&self) -> bool {
        self.definition.active
    }

    pub fn combining_algorithm(&self) -> CombiningAlgorithm {
        self.definition.combining
    }

    pub fn default_effect(&self) -> Effect {
        self.definition.default_effect
    }

    /// Decide whether `identity` may access `resource`.
    ///
    /// An inactive point permits without loading anything. Policy load
    /// failures are returned as errors; policy evaluation failures are not.
    pub fn decide(
        &self,
        identity: &Identity,
        resource: &Resource,
        context: &Value,
    ) -> Result<Decision, AuthzError> {
        let decision = if self.definition.active {
            let set = self.get_policies(identity)?;
            let outcomes: Vec<PolicyOutcome> = set
                .policies()
                .iter()
                .enumerate()
                .map(|(index, policy)| PolicyOutcome {
                    policy: PolicyRef {
                        index,
                        name: policy.name().to_string(),
                    },
                    result: policy.evaluate(identity, resource, context, &self.collaborators),
                })
                .collect();
            self.definition
                .combining
                .combine(&outcomes, self.definition.default_effect)
        } else {
            Decision::by_default(Effect::Permit)
        };

        self.audit.record(&AuditRecord {
            point: &self.namespaced_alias,
            principal: identity.principal_id(),
            resource: &resource.alias,
            decision: &decision,
        });
        Ok(decision)
    }

    /// The policy set for `identity`, loading it if the cache holds another principal's.
    pub fn get_policies(&self, identity: &Identity) -> Result<Arc<PolicySet>, AuthzError> {
        if let Some(set) = self.cached_for(identity) {
            return Ok(set);
        }

        let _guard = self.reload.lock();
        // Another caller may have loaded it while we waited.
        if let Some(set) = self.cached_for(identity) {
            return Ok(set);
        }

        let mut set = PolicySet::new(identity.principal_id());
        self.loader
            .load_policies(&self.definition, identity, &mut set)?;
        tracing::debug!(
            point = %self.namespaced_alias,
            principal = %identity.principal_id(),
            policies = set.len(),
            "Loaded policies"
        );
        let set = Arc::new(set);
        *self.cache.write() = Some(set.clone());
        Ok(set)
    }

    /// Append a policy to the currently cached set. Returns `false` if nothing is loaded yet.
    pub fn add_policy(&self, policy: AuthorizationPolicy) -> bool {
        let _guard = self.reload.lock();
        let mut cache = self.cache.write();
        let Some(current) = cache.as_ref() else {
            return false;
        };
        let mut next = PolicySet::clone(current);
        next.add_policy(policy);
        *cache = Some(Arc::new(next));
        true
    }

    /// Drop the cached policy set; the next decision reloads.
    pub fn invalidate(&self) {
        let _guard = self.reload.lock();
        *self.cache.write() = None;
    }

    fn cached_for(&self, identity: &Identity) -> Option<Arc<PolicySet>> {
        self.cache
            .read()
            .as_ref()
            .filter(|set| set.is_loaded_for(identity))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::resolver::Directory;
    use crate::authz::selector::{PolicyTarget, ResourceSelector};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loader returning a fixed policy list and counting its calls.
    struct StaticLoader {
        active: bool,
        combining: CombiningAlgorithm,
        policies: Vec<AuthorizationPolicy>,
        loads: AtomicUsize,
        fail: bool,
    }

    impl StaticLoader {
        fn new(policies: Vec<AuthorizationPolicy>) -> Self {
            Self {
                active: true,
                combining: CombiningAlgorithm::DenyOverrides,
                policies,
                loads: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    impl PolicyLoader for StaticLoader {
        fn load_point(&self, point: &mut PointDefinition) -> Result<(), AuthzError> {
            point.active = self.active;
            point.combining = self.combining;
            point.default_effect = Effect::Deny;
            point.name = Some("Test point".into());
            Ok(())
        }

        fn load_policies(
            &self,
            _point: &PointDefinition,
            identity: &Identity,
            set: &mut PolicySet,
        ) -> Result<(), AuthzError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthzError::UndefinedPoint("test.point".into()));
            }
            for policy in &self.policies {
                set.add_policy(policy.clone());
            }
            // Make the loaded set identity-specific so tests can tell sets apart.
            set.add_policy(AuthorizationPolicy::new(
                format!("for-{}", identity.principal_id()),
                Effect::Deny,
                PolicyTarget::new().with_resource(ResourceSelector::parse("never.Matches").unwrap()),
            ));
            Ok(())
        }
    }

    struct FailingPointLoader;

    impl PolicyLoader for FailingPointLoader {
        fn load_point(&self, point: &mut PointDefinition) -> Result<(), AuthzError> {
            Err(AuthzError::UndefinedPoint(point.alias_with_namespace()))
        }

        fn load_policies(&self, _: &PointDefinition, _: &Identity, _: &mut PolicySet) -> Result<(), AuthzError> {
            Ok(())
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators::from_directory(Arc::new(Directory::new()))
    }

    fn point(loader: Arc<StaticLoader>) -> AuthorizationPoint {
        AuthorizationPoint::new("test", "point", loader, collaborators()).unwrap()
    }

    fn resource() -> Resource {
        Resource::new("test.Read", "test\\Read")
    }

    fn permit_all() -> AuthorizationPolicy {
        AuthorizationPolicy::new("permit-all", Effect::Permit, PolicyTarget::new())
    }

    #[test]
    fn test_point_metadata_loaded_on_construction() {
        let p = point(Arc::new(StaticLoader::new(vec![])));
        assert_eq!(p.alias_with_namespace(), "test.point");
        assert_eq!(p.definition().name.as_deref(), Some("Test point"));
        assert_eq!(p.default_effect(), Effect::Deny);

        let err = AuthorizationPoint::new("x", "y", Arc::new(FailingPointLoader), collaborators())
            .unwrap_err();
        assert!(matches!(err, AuthzError::UndefinedPoint(ref a) if a == "x.y"));
    }

    #[test]
    fn test_decide_uses_policies() {
        let p = point(Arc::new(StaticLoader::new(vec![permit_all()])));
        let d = p.decide(&Identity::user("alice"), &resource(), &json!({})).unwrap();
        assert_eq!(d.effect, Effect::Permit);
        assert_eq!(d.deciding_policy.unwrap().name, "permit-all");
    }

    #[test]
    fn test_no_applicable_policy_uses_default() {
        let p = point(Arc::new(StaticLoader::new(vec![])));
        let d = p.decide(&Identity::user("alice"), &resource(), &json!({})).unwrap();
        assert_eq!(d, Decision::by_default(Effect::Deny));
    }

    #[test]
    fn test_inactive_point_permits_without_loading() {
        let mut loader = StaticLoader::new(vec![]);
        loader.active = false;
        loader.fail = true;
        let loader = Arc::new(loader);
        let p = point(loader.clone());
        let d = p.decide(&Identity::user("alice"), &resource(), &json!({})).unwrap();
        assert_eq!(d, Decision::by_default(Effect::Permit));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_failure_propagates() {
        let mut loader = StaticLoader::new(vec![permit_all()]);
        loader.fail = true;
        let p = point(Arc::new(loader));
        let err = p
            .decide(&Identity::user("alice"), &resource(), &json!({}))
            .unwrap_err();
        assert!(err.is_load_error());
    }

    #[test]
    fn test_cache_reused_for_same_principal() {
        let loader = Arc::new(StaticLoader::new(vec![permit_all()]));
        let p = point(loader.clone());
        let alice = Identity::user("alice");
        let first = p.decide(&alice, &resource(), &json!({})).unwrap();
        let second = p.decide(&alice, &resource(), &json!({})).unwrap();
        assert_eq!(first, second);
        // A token for the same user shares the cache entry.
        p.get_policies(&Identity::token("tok", "alice")).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_reloaded_for_other_principal() {
        let loader = Arc::new(StaticLoader::new(vec![]));
        let p = point(loader.clone());
        let a = p.get_policies(&Identity::user("alice")).unwrap();
        let b = p.get_policies(&Identity::user("bob")).unwrap();
        assert_eq!(a.names(), vec!["for-alice"]);
        assert_eq!(b.names(), vec!["for-bob"]);
        assert_eq!(b.principal(), "bob");
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        // The set handed out for alice is untouched by the reload.
        assert_eq!(a.principal(), "alice");
    }

    #[test]
    fn test_add_policy_appends_to_cached_set() {
        let p = point(Arc::new(StaticLoader::new(vec![])));
        assert!(!p.add_policy(permit_all()));

        let alice = Identity::user("alice");
        let before = p.get_policies(&alice).unwrap();
        assert!(p.add_policy(permit_all()));
        let after = p.get_policies(&alice).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(after.names(), vec!["for-alice", "permit-all"]);

        let d = p.decide(&alice, &resource(), &json!({})).unwrap();
        assert_eq!(d.effect, Effect::Permit);
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let loader = Arc::new(StaticLoader::new(vec![]));
        let p = point(loader.clone());
        let alice = Identity::user("alice");
        p.get_policies(&alice).unwrap();
        p.invalidate();
        p.get_policies(&alice).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_audit_sink_receives_every_decision() {
        #[derive(Default)]
        struct Collect(parking_lot::Mutex<Vec<(String, Effect, Option<String>)>>);

        impl AuditSink for Collect {
            fn record(&self, r: &AuditRecord<'_>) {
                self.0.lock().push((
                    r.principal.to_string(),
                    r.decision.effect,
                    r.decision.deciding_policy.as_ref().map(|p| p.name.clone()),
                ));
            }
        }

        let sink = Arc::new(Collect::default());
        let p = point(Arc::new(StaticLoader::new(vec![permit_all()])))
            .with_audit_sink(sink.clone());
        p.decide(&Identity::user("alice"), &resource(), &json!({})).unwrap();
        let records = sink.0.lock();
        assert_eq!(
            *records,
            vec![("alice".to_string(), Effect::Permit, Some("permit-all".to_string()))]
        );
    }
}
