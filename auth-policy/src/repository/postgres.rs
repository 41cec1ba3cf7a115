//! PostgreSQL-backed policy repository
//!
//! Policies live in one table keyed by id, their templates in three link
//! tables keyed by `(template, policy)`. Each link row stores the compiled,
//! anchored pattern, so subject resolution is a single regex comparison in
//! the database and never recompiles templates.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::{
    config::StoreConfig,
    error::{PolicyError, Result},
    link::{Dimension, LinkEntry},
    models::{Conditions, Effect, PolicyRecord},
    repository::PolicyRepository,
    schema::{POLICY_TABLE, SCHEMAS, SUBJECT_TABLE},
    template::CompileError,
};

/// SQLSTATE `invalid_regular_expression`
const INVALID_REGEX: &str = "2201B";

/// PostgreSQL-backed policy repository
#[derive(Clone)]
pub struct PostgresPolicyRepository {
    pool: PgPool,
    case_insensitive: bool,
}

impl PostgresPolicyRepository {
    /// Create a new PostgreSQL repository
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            case_insensitive: false,
        }
    }

    /// Create with connection string
    pub async fn from_connection_string(connection_string: &str) -> Result<Self> {
        let pool = PgPool::connect(connection_string).await?;
        Ok(Self::new(pool))
    }

    /// Create from configuration, opening a pool with its limits
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let pool = config.connect().await?;
        Ok(Self::new(pool).with_case_insensitive_match(config.case_insensitive_match))
    }

    /// Match subjects with `~*` instead of `~`
    pub fn with_case_insensitive_match(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the policy tables if they do not exist yet
    pub async fn create_schemas(&self) -> Result<()> {
        for statement in SCHEMAS {
            if let Err(e) = sqlx::query(statement).execute(&self.pool).await {
                error!(error = %e, "Failed to create policy schema");
                return Err(e.into());
            }
        }

        info!("Policy schemas created");
        Ok(())
    }

    fn match_operator(&self) -> &'static str {
        if self.case_insensitive {
            "~*"
        } else {
            "~"
        }
    }
}

async fn insert_policy(
    tx: &mut Transaction<'_, Postgres>,
    policy: &PolicyRecord,
    conditions: &str,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {POLICY_TABLE} (id, description, effect, conditions) \
         VALUES ($1, $2, $3, $4::json)"
    ))
    .bind(&policy.id)
    .bind(&policy.description)
    .bind(policy.effect.as_str())
    .bind(conditions)
    .execute(&mut **tx)
    .await?;

    for dimension in Dimension::ALL {
        let entries = LinkEntry::compile_all(policy, dimension)?;
        insert_links(tx, dimension, &entries).await?;
    }

    Ok(())
}

async fn insert_links(
    tx: &mut Transaction<'_, Postgres>,
    dimension: Dimension,
    entries: &[LinkEntry],
) -> Result<()> {
    let statement = format!(
        "INSERT INTO {} (policy, template, compiled) VALUES ($1, $2, $3)",
        dimension.table()
    );

    for entry in entries {
        check_pattern(tx, entry).await?;
        sqlx::query(&statement)
            .bind(&entry.policy)
            .bind(entry.template())
            .bind(entry.compiled())
            .execute(&mut **tx)
            .await?;
    }

    debug!(%dimension, count = entries.len(), "Inserted policy links");
    Ok(())
}

/// Have the database parse the compiled pattern before it is stored, so a
/// pattern it cannot evaluate never reaches the subject query.
async fn check_pattern(tx: &mut Transaction<'_, Postgres>, entry: &LinkEntry) -> Result<()> {
    let checked = sqlx::query("SELECT '' ~ $1")
        .bind(entry.compiled())
        .execute(&mut **tx)
        .await;

    match checked {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(INVALID_REGEX) => {
            Err(CompileError::Rejected {
                template: entry.template().to_string(),
                pattern: entry.compiled().to_string(),
                reason: e.message().to_string(),
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn fetch_templates(
    conn: &mut PgConnection,
    dimension: Dimension,
    id: &str,
) -> Result<BTreeSet<String>> {
    let templates = sqlx::query_scalar::<_, String>(&format!(
        "SELECT template FROM {} WHERE policy = $1",
        dimension.table()
    ))
    .bind(id)
    .fetch_all(conn)
    .await?;

    Ok(templates.into_iter().collect())
}

/// Roll back after `cause`, keeping both errors if the rollback fails too.
async fn abort(tx: Transaction<'_, Postgres>, cause: PolicyError) -> PolicyError {
    warn!(error = %cause, "Rolling back policy creation");

    match tx.rollback().await {
        Ok(()) => cause,
        Err(rollback) => {
            error!(error = %rollback, "Failed to roll back policy creation");
            PolicyError::RollbackFailed {
                cause: Box::new(cause),
                rollback: rollback.into(),
            }
        }
    }
}

#[async_trait]
impl PolicyRepository for PostgresPolicyRepository {
    async fn create(&self, policy: &PolicyRecord) -> Result<()> {
        debug!(policy_id = %policy.id, "Writing policy to PostgreSQL");
        policy.validate()?;

        let conditions = serde_json::to_string(&policy.conditions)?;

        // Dropping the transaction without committing also rolls it back,
        // which covers cancellation of this future.
        let mut tx = self.pool.begin().await?;
        let inserted = insert_policy(&mut tx, policy, &conditions).await;
        if let Err(cause) = inserted {
            return Err(abort(tx, cause).await);
        }
        tx.commit().await?;

        info!(policy_id = %policy.id, "Policy created successfully");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<PolicyRecord> {
        debug!(policy_id = id, "Reading policy from PostgreSQL");

        // One snapshot for the policy row and its links, so a concurrent
        // delete is seen either entirely or not at all.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            "SELECT id, description, effect, conditions::text AS conditions \
             FROM {POLICY_TABLE} WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let effect: Effect = row.try_get::<String, _>("effect")?.parse()?;
        let description: Option<String> = row.try_get("description")?;
        let conditions: Option<String> = row.try_get("conditions")?;
        let conditions: Conditions = match conditions {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };

        let mut policy = PolicyRecord::new(&row.try_get::<String, _>("id")?, effect)
            .with_description(&description.unwrap_or_default())
            .with_conditions(conditions);

        for dimension in Dimension::ALL {
            *policy.templates_mut(dimension) = fetch_templates(&mut tx, dimension, id).await?;
        }
        tx.commit().await?;

        Ok(policy)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        debug!(policy_id = id, "Deleting policy from PostgreSQL");

        let result = sqlx::query(&format!("DELETE FROM {POLICY_TABLE} WHERE id = $1"))
            .bind(id)
            .execute(&self.pool)
            .await?;

        info!(policy_id = id, rows = result.rows_affected(), "Policy deleted");
        Ok(())
    }

    async fn find_subject_matches(&self, subject: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(&format!(
            "SELECT DISTINCT policy FROM {SUBJECT_TABLE} WHERE $1 {} compiled",
            self.match_operator()
        ))
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;

        debug!(subject, count = ids.len(), "Matched subject templates");
        Ok(ids)
    }

    async fn find_global_policies(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(&format!(
            "SELECT p.id FROM {POLICY_TABLE} p \
             LEFT JOIN {SUBJECT_TABLE} ps ON p.id = ps.policy \
             WHERE ps.policy IS NULL"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
