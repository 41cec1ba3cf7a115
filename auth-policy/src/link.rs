use std::fmt;

use crate::models::PolicyRecord;
use crate::schema::{PERMISSION_TABLE, RESOURCE_TABLE, SUBJECT_TABLE};
use crate::template::{compile, CompileError, CompiledTemplate};

/// One of the three matchable dimensions of a policy. Each has its own link
/// table with identical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Subject,
    Resource,
    Permission,
}

impl Dimension {
    /// All dimensions, in the order links are written.
    pub const ALL: [Dimension; 3] = [
        Dimension::Subject,
        Dimension::Permission,
        Dimension::Resource,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Dimension::Subject => SUBJECT_TABLE,
            Dimension::Resource => RESOURCE_TABLE,
            Dimension::Permission => PERMISSION_TABLE,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Subject => f.write_str("subject"),
            Dimension::Resource => f.write_str("resource"),
            Dimension::Permission => f.write_str("permission"),
        }
    }
}

/// A `(template, compiled, policy)` row of a link table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub policy: String,
    pub matcher: CompiledTemplate,
}

impl LinkEntry {
    pub fn template(&self) -> &str {
        self.matcher.template()
    }

    pub fn compiled(&self) -> &str {
        self.matcher.pattern()
    }

    /// Compile every template of `dimension` with the policy's delimiters.
    ///
    /// # Errors
    ///
    /// The first [`CompileError`] encountered; nothing is returned for the
    /// templates that did compile.
    pub fn compile_all(
        policy: &PolicyRecord,
        dimension: Dimension,
    ) -> Result<Vec<LinkEntry>, CompileError> {
        policy
            .templates(dimension)
            .iter()
            .map(|template| {
                let matcher = compile(template, policy.start_delimiter, policy.end_delimiter)?;
                Ok(LinkEntry {
                    policy: policy.id.clone(),
                    matcher,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Effect;

    #[test]
    fn test_compile_all_uses_policy_delimiters() {
        let policy = PolicyRecord::new("p1", Effect::Allow)
            .with_delimiters('{', '}')
            .with_resources(["articles:{[0-9]+}", "articles:<draft>"]);

        let entries = LinkEntry::compile_all(&policy, Dimension::Resource).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.policy == "p1"));
        let numbered = entries
            .iter()
            .find(|entry| entry.template() == "articles:{[0-9]+}")
            .unwrap();
        assert_eq!(numbered.compiled(), "^articles:([0-9]+)$");
        let literal = entries
            .iter()
            .find(|entry| entry.template() == "articles:<draft>")
            .unwrap();
        assert!(literal.matcher.is_match("articles:<draft>"));
    }

    #[test]
    fn test_compile_all_fails_on_first_bad_template() {
        let policy = PolicyRecord::new("p1", Effect::Deny).with_permissions(["view", "<(>"]);
        assert!(LinkEntry::compile_all(&policy, Dimension::Permission).is_err());
    }

    #[test]
    fn test_empty_dimension_has_no_entries() {
        let policy = PolicyRecord::new("p1", Effect::Allow);
        assert!(LinkEntry::compile_all(&policy, Dimension::Subject)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_tables_are_distinct() {
        let tables: std::collections::HashSet<_> =
            Dimension::ALL.iter().map(|dimension| dimension.table()).collect();
        assert_eq!(tables.len(), 3);
    }
}
