//! Access policy store for RustCare Engine
//!
//! This crate persists attribute-based access policies and answers the
//! question "which policies apply to this subject?". The final allow/deny
//! decision and condition evaluation happen elsewhere.
//!
//! # Core Concepts
//!
//! - **Policy**: grants or denies an **effect** for subjects, resources and
//!   permissions, optionally narrowed by opaque conditions
//! - **Template**: an author-written string such as `users:<[0-9]+>:posts`;
//!   text inside `<...>` is a regular expression, the rest is literal
//! - **Global policy**: a policy without subject templates, applying to every
//!   subject
//!
//! Templates are compiled into anchored patterns once, when the policy is
//! created, and stored next to the original text.
//!
//! # Example
//!
//! ```rust,no_run
//! use auth_policy::{Effect, InMemoryPolicyRepository, PolicyRecord, PolicyRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = InMemoryPolicyRepository::new();
//!
//!     let policy = PolicyRecord::new("p1", Effect::Allow)
//!         .with_subjects(["users:<.+>"])
//!         .with_resources(["articles:1"])
//!         .with_permissions(["view"]);
//!     repo.create(&policy).await?;
//!
//!     let applicable = repo.find_by_subject("users:alice").await?;
//!     assert_eq!(applicable.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod error;
pub mod link;
pub mod models;
pub mod repository;
pub mod schema;
pub mod template;

pub use crate::config::StoreConfig;
pub use error::*;
pub use link::{Dimension, LinkEntry};
pub use models::*;
pub use repository::{InMemoryPolicyRepository, PolicyRepository, PostgresPolicyRepository};
pub use template::{compile, compile_default, CompileError, CompiledTemplate};
