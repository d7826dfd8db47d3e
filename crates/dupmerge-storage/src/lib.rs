//! MySQL storage gateway for the merge-suggestion pipeline.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::mysql::{MySqlArguments, MySqlPool};
use sqlx::{MySql, Row};
use thiserror::Error;
use tracing::{error, info};

use dupmerge_core::{DuplicateDetailRow, ProductRef};

pub const CRATE_NAME: &str = "dupmerge-storage";

const SELECT_LATEST_GROUP_ID_SQL: &str = "SELECT id FROM product_duplicates WHERE title = ? ORDER BY created_at DESC LIMIT 1";

const INSERT_GROUP_SQL: &str =
    "INSERT INTO product_duplicates (title, created_at, updated_at) VALUES (?, NOW(), NOW())";

const INSERT_MEMBERSHIP_SQL: &str = "INSERT INTO product_duplicate_lists (product_duplicate_id, external_id, product_id, deleted_at, created_at, updated_at) VALUES (?, ?, ?, NULL, NOW(), NOW())";

/// Positional bind value for a parameterized gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connect failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("database fetch failed: {0}")]
    Fetch(#[source] sqlx::Error),
    #[error("database execute failed: {0}")]
    Execute(#[source] sqlx::Error),
    #[error("transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),
    #[error("result row missing expected column: {0}")]
    RowShape(#[source] sqlx::Error),
}

/// Outcome of persisting one grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedGroup {
    pub group_id: u64,
    /// False when the title already had a group row and it was reused.
    pub created: bool,
    pub memberships: usize,
}

/// Storage operations the pipeline depends on.
#[async_trait]
pub trait MergeStore: Send + Sync {
    /// Single-column read returning the grouping-key column.
    async fn group_titles(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<String>, StoreError>;

    /// Typed tabular read for the duplicate detail query.
    async fn duplicate_details(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<DuplicateDetailRow>, StoreError>;

    /// Ensure a group row exists for `title` and attach `members`, all within
    /// one transaction. The newest existing row with the title is reused; a
    /// failure rolls back the group and its memberships together.
    async fn persist_group(
        &self,
        title: &str,
        members: &[ProductRef],
    ) -> Result<PersistedGroup, StoreError>;
}

#[derive(Debug, Clone)]
pub struct Db {
    pool: MySqlPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPool::connect(database_url).await.map_err(|err| {
            error!(error = %err, "database connect failed");
            StoreError::Connect(err)
        })?;
        Ok(Self { pool })
    }
}

fn bind_params<'q>(
    sql: &'q str,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.clone()),
            SqlParam::Date(value) => query.bind(*value),
            SqlParam::DateTime(value) => query.bind(*value),
        };
    }
    query
}

#[async_trait]
impl MergeStore for Db {
    async fn group_titles(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<String>, StoreError> {
        let rows = bind_params(sql, params)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                error!(error = %err, "group title fetch failed");
                StoreError::Fetch(err)
            })?;

        rows.iter()
            .map(|row| {
                row.try_get("group_title").map_err(|err| {
                    error!(error = %err, "group title column missing from result");
                    StoreError::RowShape(err)
                })
            })
            .collect()
    }

    async fn duplicate_details(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<DuplicateDetailRow>, StoreError> {
        let rows = bind_params(sql, params)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                error!(error = %err, "duplicate detail fetch failed");
                StoreError::Fetch(err)
            })?;

        rows.iter()
            .map(|row| {
                let mapped = (|| -> Result<DuplicateDetailRow, sqlx::Error> {
                    Ok(DuplicateDetailRow {
                        group_title: row.try_get("group_title")?,
                        product_id: row.try_get("id")?,
                        external_id: row.try_get("external_id")?,
                    })
                })();
                mapped.map_err(|err| {
                    error!(error = %err, "duplicate detail row has unexpected shape");
                    StoreError::RowShape(err)
                })
            })
            .collect()
    }

    async fn persist_group(
        &self,
        title: &str,
        members: &[ProductRef],
    ) -> Result<PersistedGroup, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|err| {
            error!(error = %err, title, "failed to open group persistence transaction");
            StoreError::Transaction(err)
        })?;

        let existing: Option<u64> = sqlx::query_scalar(SELECT_LATEST_GROUP_ID_SQL)
            .bind(title)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| {
                error!(error = %err, title, "group lookup failed");
                StoreError::Fetch(err)
            })?;

        let (group_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let result = sqlx::query(INSERT_GROUP_SQL)
                    .bind(title)
                    .execute(&mut *tx)
                    .await
                    .map_err(|err| {
                        error!(error = %err, title, "group insert failed");
                        StoreError::Execute(err)
                    })?;
                (result.last_insert_id(), true)
            }
        };

        for member in members {
            sqlx::query(INSERT_MEMBERSHIP_SQL)
                .bind(group_id)
                .bind(&member.external_id)
                .bind(member.product_id)
                .execute(&mut *tx)
                .await
                .map_err(|err| {
                    error!(
                        error = %err,
                        group_id,
                        product_id = member.product_id,
                        "membership insert failed"
                    );
                    StoreError::Execute(err)
                })?;
        }

        tx.commit().await.map_err(|err| {
            error!(error = %err, title, "group persistence commit failed");
            StoreError::Transaction(err)
        })?;

        if created {
            info!(group_id, title, "inserted merge suggestion group");
        }
        info!(group_id, count = members.len(), "inserted product memberships");

        Ok(PersistedGroup {
            group_id,
            created,
            memberships: members.len(),
        })
    }
}
