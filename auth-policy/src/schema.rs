//! PostgreSQL schema for the policy store.
//!
//! Link rows reference their policy with `ON DELETE CASCADE`; deleting a
//! policy row is all it takes to remove a policy.

pub const POLICY_TABLE: &str = "abac_policy";
pub const SUBJECT_TABLE: &str = "abac_policy_subject";
pub const RESOURCE_TABLE: &str = "abac_policy_resource";
pub const PERMISSION_TABLE: &str = "abac_policy_permission";

/// DDL in dependency order. Every statement is idempotent.
pub const SCHEMAS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS abac_policy (
        id          text NOT NULL PRIMARY KEY,
        description text DEFAULT '',
        created_at  timestamptz DEFAULT NOW(),
        effect      text NOT NULL CHECK (effect = 'allow' OR effect = 'deny'),
        conditions  json DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS abac_policy_subject (
        compiled text NOT NULL,
        template text NOT NULL,
        policy   text NOT NULL REFERENCES abac_policy (id) ON DELETE CASCADE,
        PRIMARY KEY (template, policy)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS abac_policy_permission (
        compiled text NOT NULL,
        template text NOT NULL,
        policy   text NOT NULL REFERENCES abac_policy (id) ON DELETE CASCADE,
        PRIMARY KEY (template, policy)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS abac_policy_resource (
        compiled text NOT NULL,
        template text NOT NULL,
        policy   text NOT NULL REFERENCES abac_policy (id) ON DELETE CASCADE,
        PRIMARY KEY (template, policy)
    )
    "#,
    // Global policies are found with an anti-join on this column.
    r#"
    CREATE INDEX IF NOT EXISTS abac_policy_subject_policy_idx
        ON abac_policy_subject (policy)
    "#,
];
