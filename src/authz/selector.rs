//! Selectors a policy target is built from.
//!
//! All selectors are validated on construction and immutable afterwards.

use std::fmt;

use crate::authz::errors::AuthzError;
use crate::authz::types::Resource;

const TYPE_SEPARATOR: char = '\\';
const PATH_SEPARATOR: char = '/';
const PROTOTYPE_EXTENSION: &str = ".php";

/// How a resource selector is matched, fixed when the selector is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSelectorKind {
    /// Prototype file path, e.g. `exface/Core/Actions/ShowDialog.php`.
    Path,
    /// Fully-qualified type name, e.g. `\exface\Core\Actions\ShowDialog`.
    TypeName,
    /// Namespaced alias, e.g. `exface.Core.ShowDialog`.
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSelector {
    raw: String,
    kind: ResourceSelectorKind,
    /// Comparison key in the selector's own matching mode.
    key: String,
}

impl ResourceSelector {
    pub fn parse(selector: &str) -> Result<Self, AuthzError> {
        let raw = selector.trim();
        if raw.is_empty() {
            return Err(invalid(selector, "selector is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(invalid(selector, "selector must not contain whitespace"));
        }

        let (kind, key) = if raw.contains(PATH_SEPARATOR) || ends_with_extension(raw) {
            let stem = strip_extension(raw);
            let key = normalize_path(stem);
            if key.is_empty() {
                return Err(invalid(selector, "path selector has no file name"));
            }
            (ResourceSelectorKind::Path, key)
        } else if raw.contains(TYPE_SEPARATOR) {
            let key = raw.trim_matches(TYPE_SEPARATOR).to_string();
            if key.is_empty() {
                return Err(invalid(selector, "type name selector has no name"));
            }
            (ResourceSelectorKind::TypeName, key)
        } else {
            (ResourceSelectorKind::Alias, raw.to_string())
        };

        Ok(Self {
            raw: raw.to_string(),
            kind,
            key,
        })
    }

    pub fn kind(&self) -> ResourceSelectorKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        match self.kind {
            ResourceSelectorKind::Path => normalize_path(&resource.type_name) == self.key,
            ResourceSelectorKind::TypeName => {
                resource.type_name.trim_matches(TYPE_SEPARATOR) == self.key
            }
            ResourceSelectorKind::Alias => resource.alias == self.key,
        }
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(selector: &str, reason: &str) -> AuthzError {
    AuthzError::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.to_string(),
    }
}

fn ends_with_extension(s: &str) -> bool {
    s.len() > PROTOTYPE_EXTENSION.len()
        && s.get(s.len() - PROTOTYPE_EXTENSION.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(PROTOTYPE_EXTENSION))
}

fn strip_extension(s: &str) -> &str {
    if ends_with_extension(s) {
        &s[..s.len() - PROTOTYPE_EXTENSION.len()]
    } else {
        s
    }
}

/// Turn type separators into path separators and drop empty segments.
fn normalize_path(s: &str) -> String {
    s.split([PATH_SEPARATOR, TYPE_SEPARATOR])
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

macro_rules! name_selector {
    ($(#[$doc:meta])* $name:ident, $what:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn parse(value: &str) -> Result<Self, AuthzError> {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(invalid(value, concat!($what, " selector is empty")));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

name_selector!(
    /// Role a principal must hold.
    RoleSelector,
    "role"
);
name_selector!(
    /// Object/class the resource must be (or descend from).
    ObjectSelector,
    "object"
);
name_selector!(
    /// Page group the resource's origin page must belong to.
    GroupSelector,
    "group"
);

/// The selectors a policy is scoped to. An absent selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTarget {
    pub role: Option<RoleSelector>,
    pub resource: Option<ResourceSelector>,
    pub object: Option<ObjectSelector>,
    pub group: Option<GroupSelector>,
    pub exclude: Vec<ResourceSelector>,
}

impl PolicyTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: RoleSelector) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_resource(mut self, resource: ResourceSelector) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_object(mut self, object: ObjectSelector) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_group(mut self, group: GroupSelector) -> Self {
        self.group = Some(group);
        self
    }

    pub fn excluding(mut self, resource: ResourceSelector) -> Self {
        self.exclude.push(resource);
        self
    }

    /// True if no selector at all is configured.
    pub fn is_unrestricted(&self) -> bool {
        self.role.is_none()
            && self.resource.is_none()
            && self.object.is_none()
            && self.group.is_none()
            && self.exclude.is_empty()
    }

    pub fn is_excluded(&self, resource: &Resource) -> bool {
        self.exclude.iter().any(|s| s.matches(resource))
    }
}
