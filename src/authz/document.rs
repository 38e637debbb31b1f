use kdl::{KdlDocument, KdlNode};

use crate::authz::combining::CombiningAlgorithm;
use crate::authz::errors::AuthzError;
use crate::authz::types::Effect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointDef {
    pub alias: String,
    pub app: String,
    pub uid: Option<String>,
    pub name: Option<String>,
    pub active: bool,
    pub combining: CombiningAlgorithm,
    pub default_effect: Effect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDef {
    pub name: String,
    /// Namespaced alias of the point, e.g. "exface.Core.action-access"
    pub point: String,
    pub effect: Option<Effect>,
    pub role: Option<String>,
    pub resource: Option<String>,
    pub object: Option<String>,
    pub group: Option<String>,
    pub exclude: Vec<String>,
    pub condition: Option<String>,
    pub context_known: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDef {
    pub name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDef {
    pub token: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDef {
    pub alias: String,
    pub extends: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDef {
    pub name: String,
    pub pages: Vec<String>,
}

/// Everything declared in one policy document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub points: Vec<PointDef>,
    pub policies: Vec<PolicyDef>,
    pub roles: Vec<String>,
    pub users: Vec<UserDef>,
    pub tokens: Vec<TokenDef>,
    pub objects: Vec<ObjectDef>,
    pub groups: Vec<GroupDef>,
}

/// Parse a KDL document string into typed definitions.
pub fn parse_document(source: &str) -> Result<ParsedDocument, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut parsed = ParsedDocument::default();

    for node in doc.nodes() {
        match node.name().value() {
            "point" => parsed.points.push(parse_point(node)?),
            "policy" => parsed.policies.push(parse_policy(node)?),
            "role" => {
                let name = required_arg(node, "role \"exface.Core.SUPERUSER\"")?;
                parsed.roles.push(name);
            }
            "user" => {
                let name = required_arg(node, "user \"alice\"")?;
                let mut roles = Vec::new();
                for child in child_nodes(node) {
                    match child.name().value() {
                        "roles" => roles = dash_list(child),
                        other => {
                            return Err(AuthzError::InvalidPolicy(format!(
                                "unexpected child `{other}` in user `{name}` (expected `roles`)"
                            )));
                        }
                    }
                }
                parsed.users.push(UserDef { name, roles });
            }
            "token" => {
                let token = required_arg(node, "token \"tok-1\" user=\"alice\"")?;
                let user = string_prop(node, "user").ok_or_else(|| {
                    AuthzError::InvalidPolicy(format!(
                        "token `{token}` missing `user` property (e.g. user=\"alice\")"
                    ))
                })?;
                parsed.tokens.push(TokenDef { token, user });
            }
            "object" => {
                let alias = required_arg(node, "object \"shop.ORDER\" extends=\"shop.DOCUMENT\"")?;
                let extends = string_prop(node, "extends");
                parsed.objects.push(ObjectDef { alias, extends });
            }
            "page-group" => {
                let name = required_arg(node, "page-group \"backoffice\"")?;
                let mut pages = Vec::new();
                for child in child_nodes(node) {
                    match child.name().value() {
                        "pages" => pages = dash_list(child),
                        other => {
                            return Err(AuthzError::InvalidPolicy(format!(
                                "unexpected child `{other}` in page-group `{name}` (expected `pages`)"
                            )));
                        }
                    }
                }
                parsed.groups.push(GroupDef { name, pages });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(parsed)
}

fn parse_point(node: &KdlNode) -> Result<PointDef, AuthzError> {
    let alias = required_arg(
        node,
        "point \"action-access\" app=\"exface.Core\" combining=\"deny-overrides\" default-effect=\"deny\"",
    )?;
    let app = string_prop(node, "app").ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "point `{alias}` missing `app` property (e.g. app=\"exface.Core\")"
        ))
    })?;
    let combining = match string_prop(node, "combining") {
        Some(s) => s.parse()?,
        None => CombiningAlgorithm::DenyOverrides,
    };
    let default_effect = match string_prop(node, "default-effect") {
        Some(s) => s.parse()?,
        None => Effect::Deny,
    };
    let active = match node.get("active") {
        Some(v) => v.as_bool().ok_or_else(|| {
            AuthzError::InvalidPolicy(format!(
                "point `{alias}`: `active` must be #true or #false"
            ))
        })?,
        None => true,
    };

    Ok(PointDef {
        app,
        uid: string_prop(node, "uid"),
        name: string_prop(node, "name"),
        active,
        combining,
        default_effect,
        alias,
    })
}

fn parse_policy(node: &KdlNode) -> Result<PolicyDef, AuthzError> {
    let name = required_arg(
        node,
        "policy \"Admins\" point=\"exface.Core.action-access\" effect=\"permit\"",
    )?;
    let point = string_prop(node, "point").ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "policy `{name}` missing `point` property (e.g. point=\"exface.Core.action-access\")"
        ))
    })?;
    let effect = string_prop(node, "effect").map(|s| s.parse()).transpose()?;

    let mut policy = PolicyDef {
        point,
        effect,
        ..Default::default()
    };

    for child in child_nodes(node) {
        let key = child.name().value();
        let slot = match key {
            "role" => &mut policy.role,
            "resource" => &mut policy.resource,
            "object" => &mut policy.object,
            "group" => &mut policy.group,
            "condition" => &mut policy.condition,
            "exclude" => {
                policy.exclude.extend(dash_list(child));
                continue;
            }
            "context-known" => {
                let known = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_bool())
                    .ok_or_else(|| {
                        AuthzError::InvalidPolicy(format!(
                            "policy `{name}`: `context-known` needs #true or #false"
                        ))
                    })?;
                policy.context_known = Some(known);
                continue;
            }
            other => {
                return Err(AuthzError::InvalidPolicy(format!(
                    "unexpected child `{other}` in policy `{name}`"
                )));
            }
        };
        if slot.is_some() {
            return Err(AuthzError::InvalidPolicy(format!(
                "policy `{name}` declares `{key}` more than once"
            )));
        }
        let value = first_string_arg(child).ok_or_else(|| {
            AuthzError::InvalidPolicy(format!(
                "policy `{name}`: `{key}` needs a string argument"
            ))
        })?;
        *slot = Some(value);
    }

    policy.name = name;
    Ok(policy)
}

fn required_arg(node: &KdlNode, example: &str) -> Result<String, AuthzError> {
    first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "{} node requires a string argument (e.g. {example})",
            node.name().value()
        ))
    })
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|c| c.nodes()).unwrap_or(&[])
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
fn dash_list(node: &KdlNode) -> Vec<String> {
    child_nodes(node)
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
