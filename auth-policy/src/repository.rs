use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::models::PolicyRecord;

mod memory;
mod postgres;

pub use memory::InMemoryPolicyRepository;
pub use postgres::PostgresPolicyRepository;

/// Storage interface for policies and their link tables
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Store a policy with all of its templates, atomically
    async fn create(&self, policy: &PolicyRecord) -> Result<()>;

    /// Read a policy back with all three template sets
    async fn get(&self, id: &str) -> Result<PolicyRecord>;

    /// Delete a policy and its templates. Unknown ids are not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Ids of policies with at least one subject template matching `subject`
    async fn find_subject_matches(&self, subject: &str) -> Result<Vec<String>>;

    /// Ids of policies without any subject template
    async fn find_global_policies(&self) -> Result<Vec<String>>;

    /// Every policy that applies to `subject`: those with a matching subject
    /// template plus the global ones. Result order is unspecified.
    async fn find_by_subject(&self, subject: &str) -> Result<Vec<PolicyRecord>> {
        debug!(subject, "Finding policies for subject");

        let matched = match self.find_subject_matches(subject).await {
            Ok(ids) => ids,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        let globals = self.find_global_policies().await?;

        let mut seen = HashSet::new();
        let mut policies = Vec::with_capacity(matched.len() + globals.len());
        for id in matched.into_iter().chain(globals) {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.get(&id).await {
                Ok(policy) => policies.push(policy),
                // Deleted after the id lookup; it is no longer committed.
                Err(e) if e.is_not_found() => debug!(policy_id = %id, "Policy vanished during lookup"),
                Err(e) => return Err(e),
            }
        }

        debug!(subject, count = policies.len(), "Found policies for subject");
        Ok(policies)
    }
}

#[async_trait]
impl<R> PolicyRepository for Arc<R>
where
    R: PolicyRepository + ?Sized,
{
    async fn create(&self, policy: &PolicyRecord) -> Result<()> {
        (**self).create(policy).await
    }

    async fn get(&self, id: &str) -> Result<PolicyRecord> {
        (**self).get(id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }

    async fn find_subject_matches(&self, subject: &str) -> Result<Vec<String>> {
        (**self).find_subject_matches(subject).await
    }

    async fn find_global_policies(&self) -> Result<Vec<String>> {
        (**self).find_global_policies().await
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Vec<PolicyRecord>> {
        (**self).find_by_subject(subject).await
    }
}
