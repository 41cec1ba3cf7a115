//! In-memory policy repository for tests, development and embedding.
//!
//! Rows are kept in the same shape as the PostgreSQL tables: a policy row
//! with its conditions serialized, and one link table per dimension keyed by
//! `(policy, template)`. Writes are staged outside the lock and published
//! under a single write lock, so readers never see part of a policy.

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PolicyError, Result};
use crate::link::{Dimension, LinkEntry};
use crate::models::{Conditions, Effect, PolicyRecord};
use crate::repository::PolicyRepository;
use crate::template::{build_matcher, CompileError};

struct PolicyRow {
    description: String,
    effect: Effect,
    conditions: String,
}

struct LinkRow {
    compiled: String,
    matcher: Regex,
    folded: Regex,
}

impl LinkRow {
    fn is_match(&self, candidate: &str, case_insensitive: bool) -> bool {
        if case_insensitive {
            self.folded.is_match(candidate)
        } else {
            self.matcher.is_match(candidate)
        }
    }
}

type LinkTable = BTreeMap<(String, String), LinkRow>;

#[derive(Default)]
struct Tables {
    policies: HashMap<String, PolicyRow>,
    links: HashMap<Dimension, LinkTable>,
}

impl Tables {
    fn link_rows(&self, dimension: Dimension) -> impl Iterator<Item = (&(String, String), &LinkRow)> {
        self.links.get(&dimension).into_iter().flatten()
    }
}

/// Thread-safe in-memory [`PolicyRepository`]
#[derive(Clone, Default)]
pub struct InMemoryPolicyRepository {
    tables: Arc<RwLock<Tables>>,
    case_insensitive: bool,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match subjects ignoring case. Applies to every stored row, including
    /// rows written through a clone that matches case-sensitively.
    pub fn with_case_insensitive_match(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.tables.read().policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn link_row(entry: &LinkEntry) -> std::result::Result<LinkRow, CompileError> {
    let folded =
        build_matcher(entry.compiled(), true).map_err(|source| CompileError::InvalidPattern {
            template: entry.template().to_string(),
            fragment: entry.compiled().to_string(),
            source,
        })?;

    Ok(LinkRow {
        compiled: entry.compiled().to_string(),
        matcher: entry.matcher.regex().clone(),
        folded,
    })
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn create(&self, policy: &PolicyRecord) -> Result<()> {
        debug!(policy_id = %policy.id, "Creating policy in memory");
        policy.validate()?;

        let row = PolicyRow {
            description: policy.description.clone(),
            effect: policy.effect,
            conditions: serde_json::to_string(&policy.conditions)?,
        };

        let mut staged = Vec::new();
        for dimension in Dimension::ALL {
            for entry in LinkEntry::compile_all(policy, dimension)? {
                let link = link_row(&entry)?;
                staged.push((dimension, entry, link));
            }
        }

        let mut tables = self.tables.write();
        if tables.policies.contains_key(&policy.id) {
            return Err(PolicyError::backend(anyhow::anyhow!(
                "duplicate key value violates unique constraint: policy id {:?} already exists",
                policy.id
            )));
        }

        tables.policies.insert(policy.id.clone(), row);
        for (dimension, entry, link) in staged {
            tables
                .links
                .entry(dimension)
                .or_default()
                .insert((entry.policy, entry.matcher.template().to_string()), link);
        }

        info!(policy_id = %policy.id, "Policy created");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<PolicyRecord> {
        debug!(policy_id = id, "Reading policy from memory");

        let (description, effect, conditions, templates) = {
            let tables = self.tables.read();
            let row = tables
                .policies
                .get(id)
                .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

            let templates: Vec<(Dimension, BTreeSet<String>)> = Dimension::ALL
                .iter()
                .map(|dimension| {
                    let set = tables
                        .link_rows(*dimension)
                        .filter(|((policy, _), _)| policy == id)
                        .map(|((_, template), _)| template.clone())
                        .collect();
                    (*dimension, set)
                })
                .collect();

            (row.description.clone(), row.effect, row.conditions.clone(), templates)
        };

        let conditions: Conditions = serde_json::from_str(&conditions)?;
        let mut policy = PolicyRecord::new(id, effect)
            .with_description(&description)
            .with_conditions(conditions);
        for (dimension, set) in templates {
            *policy.templates_mut(dimension) = set;
        }

        Ok(policy)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let existed = tables.policies.remove(id).is_some();
        for table in tables.links.values_mut() {
            table.retain(|(policy, _), _| policy != id);
        }

        if existed {
            info!(policy_id = id, "Policy deleted");
        }
        Ok(())
    }

    async fn find_subject_matches(&self, subject: &str) -> Result<Vec<String>> {
        let tables = self.tables.read();
        let ids: BTreeSet<String> = tables
            .link_rows(Dimension::Subject)
            .filter(|(_, link)| link.is_match(subject, self.case_insensitive))
            .map(|((policy, _), _)| policy.clone())
            .collect();

        Ok(ids.into_iter().collect())
    }

    async fn find_global_policies(&self) -> Result<Vec<String>> {
        let tables = self.tables.read();
        let restricted: BTreeSet<&str> = tables
            .link_rows(Dimension::Subject)
            .map(|((policy, _), _)| policy.as_str())
            .collect();

        let mut ids: Vec<String> = tables
            .policies
            .keys()
            .filter(|id| !restricted.contains(id.as_str()))
            .cloned()
            .collect();
        ids.sort();

        Ok(ids)
    }
}
