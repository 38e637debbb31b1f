#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tollgate::authz::loader::PolicyCatalog;
use tollgate::authz::registry::PointRegistry;
use tollgate::authz::types::Resource;

pub const SHOP_POLICIES: &str = include_str!("../../policies/00_points.kdl");
pub const SHOP_DIRECTORY: &str = include_str!("../../policies/10_directory.kdl");
pub const SHOP_RULES: &str = include_str!("../../policies/20_rules.kdl");

/// Writes the shop fixture as three documents into a fresh directory.
pub fn policy_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("00_points.kdl"), SHOP_POLICIES).unwrap();
    std::fs::write(dir.path().join("10_directory.kdl"), SHOP_DIRECTORY).unwrap();
    std::fs::write(dir.path().join("20_rules.kdl"), SHOP_RULES).unwrap();
    dir
}

pub fn catalog() -> Arc<PolicyCatalog> {
    let dir = policy_dir();
    Arc::new(PolicyCatalog::load_dir(dir.path()).unwrap())
}

pub fn registry() -> Arc<PointRegistry> {
    let dir = policy_dir();
    Arc::new(PointRegistry::load_dir(dir.path()).unwrap())
}

pub fn read_data() -> Resource {
    Resource::new("exface.Core.ReadData", "exface\\Core\\Actions\\ReadData")
}

pub fn show_dialog() -> Resource {
    Resource::new("exface.Core.ShowDialog", "exface\\Core\\Actions\\ShowDialog")
}

pub fn delete_object() -> Resource {
    Resource::new("exface.Core.DeleteObject", "exface\\Core\\Actions\\DeleteObject")
}
