use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::loader::PolicyCatalog;
use crate::authz::point::{AuthorizationPoint, PolicyLoader};
use crate::authz::resolver::Collaborators;

/// Every declared point, keyed by namespaced alias. All points share one catalog.
#[derive(Debug)]
pub struct PointRegistry {
    points: BTreeMap<String, Arc<AuthorizationPoint>>,
}

impl PointRegistry {
    pub fn load_dir(dir: &Path) -> Result<Self, AuthzError> {
        Self::from_catalog(Arc::new(PolicyCatalog::load_dir(dir)?))
    }

    pub fn from_catalog(catalog: Arc<PolicyCatalog>) -> Result<Self, AuthzError> {
        let collaborators = Collaborators::from_directory(catalog.directory());
        let loader: Arc<dyn PolicyLoader> = catalog.clone();

        let mut points = BTreeMap::new();
        for (app, alias) in catalog.point_keys() {
            let point =
                AuthorizationPoint::new(app, alias, loader.clone(), collaborators.clone())?;
            points.insert(point.alias_with_namespace().to_string(), Arc::new(point));
        }

        Ok(Self { points })
    }

    pub fn get(&self, namespaced_alias: &str) -> Option<Arc<AuthorizationPoint>> {
        self.points.get(namespaced_alias).cloned()
    }

    /// Points in alias order.
    pub fn points(&self) -> impl Iterator<Item = &Arc<AuthorizationPoint>> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::condition::ExpressionEvaluator;
    use crate::authz::document::parse_document;
    use crate::authz::types::{Effect, Identity, Resource};
    use serde_json::json;

    const POLICIES: &str = r#"
point "page-access" app="exface.Core" default-effect="permit"
point "action-access" app="exface.Core" combining="permit-overrides"

user "alice"

policy "readers" point="exface.Core.action-access" effect="permit" {
    resource "exface/Core/Actions/ReadData.php"
}
"#;

    fn registry() -> PointRegistry {
        let catalog =
            PolicyCatalog::compile(vec![parse_document(POLICIES).unwrap()], &ExpressionEvaluator)
                .unwrap();
        PointRegistry::from_catalog(Arc::new(catalog)).unwrap()
    }

    #[test]
    fn test_points_sorted_by_alias() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        let aliases: Vec<_> = registry
            .points()
            .map(|p| p.alias_with_namespace().to_string())
            .collect();
        assert_eq!(aliases, vec!["exface.Core.action-access", "exface.Core.page-access"]);
        assert!(registry.get("exface.Core.nowhere").is_none());
    }

    #[test]
    fn test_points_decide_with_their_own_metadata() {
        let registry = registry();
        let alice = Identity::user("alice");
        let read = Resource::new("exface.Core.ReadData", "exface\\Core\\Actions\\ReadData");
        let delete = Resource::new("exface.Core.DeleteObject", "exface\\Core\\Actions\\DeleteObject");

        let actions = registry.get("exface.Core.action-access").unwrap();
        assert!(actions.decide(&alice, &read, &json!({})).unwrap().is_permitted());
        let d = actions.decide(&alice, &delete, &json!({})).unwrap();
        assert_eq!(d.effect, Effect::Deny);
        assert!(d.deciding_policy.is_none());

        let pages = registry.get("exface.Core.page-access").unwrap();
        assert!(pages.decide(&alice, &delete, &json!({})).unwrap().is_permitted());
    }
}
