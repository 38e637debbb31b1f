//! Tollgate - authorization enforcement points
//!
//! This library provides the policy engine and its HTTP decision API.
//! It exposes all modules for testing purposes.

pub mod authz;
pub mod errors;
pub mod settings;
pub mod web;
