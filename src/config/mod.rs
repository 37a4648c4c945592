//! Audit run configuration
//!
//! The configuration is accepted as an already-parsed value: callers either
//! deserialize JSON into [`AuditConfig`] or assemble one through the
//! type-safe [`AuditConfigBuilder`].

mod builder;
mod types;

pub use builder::AuditConfigBuilder;
pub use types::{AuditConfig, Budgets, PageConfig, Parallelism, PluginFilter, ThrottlingMethod};
