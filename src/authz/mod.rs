//! Policy decision engine.
//!
//! Policies are grouped into authorization points. A point loads the policies
//! that concern a principal, evaluates each against the requested resource and
//! combines the results into a single permit or deny.

pub mod combining;
pub mod condition;
pub mod document;
pub mod errors;
pub mod loader;
pub mod point;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod selector;
pub mod types;
pub mod web;

pub use combining::CombiningAlgorithm;
pub use errors::AuthzError;
pub use loader::PolicyCatalog;
pub use point::{AuthorizationPoint, PolicyLoader, PolicySet};
pub use policy::AuthorizationPolicy;
pub use registry::PointRegistry;
pub use types::{Decision, Effect, Identity, PermissionResult, Resource};
