//! PostgreSQL storage backend

use crate::batch::{mirror_batches, MIRROR_BATCH_SIZE};
use crate::error::{Result, StoreError};
use crate::store::{
    AccessStore, AuditLog, AuditSink, MirrorStore, RadiusServerStore, SyncEventLog, SyncLease,
    SyncStore, SyncTransaction,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::BTreeSet;
use vpn_types::{
    AccessGrant, AuditActor, AuditEntry, AuditRecord, MirrorRecord, PrincipalName, RadiusServer,
    RadiusServerId, SyncCounts, SyncEvent,
};

/// Advisory lock key serialising sync passes across processes.
pub const SYNC_LOCK_KEY: i64 = 0x7670_6e5f_7379_6e63;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    batch_size: usize,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: MIRROR_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn parse_principal(raw: String) -> Result<PrincipalName> {
    PrincipalName::parse(raw.as_str())
        .map_err(|e| StoreError::CorruptRecord(format!("principal '{}': {}", raw, e)))
}

fn principal_strings(principals: &BTreeSet<PrincipalName>) -> Vec<String> {
    principals.iter().map(|p| p.as_str().to_string()).collect()
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_column(row: &PgRow, column: &str) -> Result<usize> {
    let value: i64 = row.try_get(column)?;
    usize::try_from(value)
        .map_err(|_| StoreError::CorruptRecord(format!("{} is negative: {}", column, value)))
}

fn mirror_from_row(row: &PgRow) -> Result<MirrorRecord> {
    Ok(MirrorRecord {
        principal_name: parse_principal(row.try_get("principal_name")?)?,
        external_id: row.try_get("external_id")?,
        display_name: row.try_get("display_name")?,
    })
}

fn server_from_row(row: &PgRow) -> Result<RadiusServer> {
    Ok(RadiusServer {
        id: RadiusServerId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl MirrorStore for PgStore {
    async fn read_mirror(&self) -> Result<Vec<MirrorRecord>> {
        let rows = sqlx::query(
            "SELECT principal_name, external_id, display_name FROM users_azure ORDER BY principal_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mirror_from_row).collect()
    }

    async fn find_user(&self, principal: &PrincipalName) -> Result<Option<MirrorRecord>> {
        let row = sqlx::query(
            "SELECT principal_name, external_id, display_name FROM users_azure WHERE principal_name = $1",
        )
        .bind(principal.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mirror_from_row).transpose()
    }

    async fn search_users(&self, term: &str, limit: usize) -> Result<Vec<MirrorRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT principal_name, external_id, display_name
            FROM users_azure
            WHERE principal_name ILIKE $1 OR display_name ILIKE $1
            ORDER BY display_name, principal_name
            LIMIT $2
            "#,
        )
        .bind(like_pattern(term))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mirror_from_row).collect()
    }
}

#[async_trait]
impl AccessStore for PgStore {
    async fn find_access_grants(
        &self,
        principals: &BTreeSet<PrincipalName>,
    ) -> Result<BTreeSet<PrincipalName>> {
        if principals.is_empty() {
            return Ok(BTreeSet::new());
        }
        let rows = sqlx::query(
            "SELECT DISTINCT principal_name FROM user_radius_access WHERE principal_name = ANY($1)",
        )
        .bind(principal_strings(principals))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PrincipalName> { parse_principal(row.try_get("principal_name")?) })
            .collect()
    }

    async fn grants_for(&self, principal: &PrincipalName) -> Result<BTreeSet<RadiusServerId>> {
        let rows = sqlx::query(
            "SELECT radius_server_id FROM user_radius_access WHERE principal_name = $1",
        )
        .bind(principal.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RadiusServerId> { Ok(RadiusServerId(row.try_get("radius_server_id")?)) })
            .collect()
    }

    async fn list_grants(&self) -> Result<Vec<AccessGrant>> {
        let rows = sqlx::query(
            "SELECT principal_name, radius_server_id FROM user_radius_access ORDER BY principal_name, radius_server_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AccessGrant> {
                Ok(AccessGrant {
                    principal_name: parse_principal(row.try_get("principal_name")?)?,
                    radius_server_id: RadiusServerId(row.try_get("radius_server_id")?),
                })
            })
            .collect()
    }

    async fn grant_access(&self, grant: &AccessGrant) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_radius_access (principal_name, radius_server_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(grant.principal_name.as_str())
        .bind(grant.radius_server_id.0)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::not_found("radius server", grant.radius_server_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn revoke_access(&self, grant: &AccessGrant) -> Result<bool> {
        let done = sqlx::query(
            "DELETE FROM user_radius_access WHERE principal_name = $1 AND radius_server_id = $2",
        )
        .bind(grant.principal_name.as_str())
        .bind(grant.radius_server_id.0)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn replace_grants(
        &self,
        principal: &PrincipalName,
        servers: &BTreeSet<RadiusServerId>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_radius_access WHERE principal_name = $1")
            .bind(principal.as_str())
            .execute(&mut *tx)
            .await?;

        if !servers.is_empty() {
            let mut insert = QueryBuilder::<Postgres>::new(
                "INSERT INTO user_radius_access (principal_name, radius_server_id) ",
            );
            insert.push_values(servers, |mut row, id| {
                row.push_bind(principal.as_str()).push_bind(id.0);
            });
            if let Err(e) = insert.build().execute(&mut *tx).await {
                return match e {
                    sqlx::Error::Database(db) if db.is_foreign_key_violation() => Err(
                        StoreError::not_found("radius server", db.message().to_string()),
                    ),
                    other => Err(other.into()),
                };
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_access_grants(&self, principals: &BTreeSet<PrincipalName>) -> Result<u64> {
        if principals.is_empty() {
            return Ok(0);
        }
        let done = sqlx::query("DELETE FROM user_radius_access WHERE principal_name = ANY($1)")
            .bind(principal_strings(principals))
            .execute(&self.pool)
            .await?;

        Ok(done.rows_affected())
    }
}

#[async_trait]
impl RadiusServerStore for PgStore {
    async fn list_servers(&self) -> Result<Vec<RadiusServer>> {
        let rows = sqlx::query(
            "SELECT id, name, description, created_at FROM radius_servers ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(server_from_row).collect()
    }

    async fn get_server(&self, id: RadiusServerId) -> Result<Option<RadiusServer>> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at FROM radius_servers WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(server_from_row).transpose()
    }

    async fn create_server(&self, name: &str, description: Option<&str>) -> Result<RadiusServer> {
        let row = sqlx::query(
            r#"
            INSERT INTO radius_servers (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description, created_at
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => server_from_row(&row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::AlreadyExists(format!("radius server '{}'", name)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_server(&self, id: RadiusServerId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let grants = sqlx::query("DELETE FROM user_radius_access WHERE radius_server_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let servers = sqlx::query("DELETE FROM radius_servers WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if servers == 0 {
            return Err(StoreError::not_found("radius server", id));
        }

        tx.commit().await?;
        Ok(grants)
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn audit(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query("INSERT INTO audit_logs (actor, action, details) VALUES ($1, $2, $3)")
            .bind(entry.actor.as_stored())
            .bind(&entry.action)
            .bind(&entry.details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor, action, details, created_at
            FROM audit_logs
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AuditRecord> {
                let actor: String = row.try_get("actor")?;
                Ok(AuditRecord {
                    id: row.try_get("id")?,
                    timestamp: row.try_get("created_at")?,
                    entry: AuditEntry::new(
                        AuditActor::from_stored(&actor),
                        row.try_get::<String, _>("action")?,
                        row.try_get::<String, _>("details")?,
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SyncEventLog for PgStore {
    async fn list_sync_events(&self, limit: usize) -> Result<Vec<SyncEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, users_added, users_updated, users_deleted, total_users
            FROM sync_events
            ORDER BY occurred_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SyncEvent> {
                Ok(SyncEvent {
                    id: row.try_get("id")?,
                    timestamp: row.try_get("occurred_at")?,
                    counts: SyncCounts {
                        added: count_column(row, "users_added")?,
                        updated: count_column(row, "users_updated")?,
                        deleted: count_column(row, "users_deleted")?,
                        total_users: count_column(row, "total_users")?,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl SyncStore for PgStore {
    async fn try_lock_sync(&self) -> Result<Option<Box<dyn SyncLease>>> {
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(SYNC_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }
        Ok(Some(Box::new(PgSyncLease { conn: Some(conn) })))
    }

    async fn begin_sync(&self) -> Result<Box<dyn SyncTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSyncTransaction {
            tx,
            batch_size: self.batch_size,
        }))
    }
}

/// Session-level advisory lock pinned to one pooled connection.
///
/// A lease dropped without `release` closes its connection instead of
/// returning it to the pool, so the server drops the lock with the session.
struct PgSyncLease {
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl SyncLease for PgSyncLease {
    async fn release(mut self: Box<Self>) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(SYNC_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                drop(conn.detach());
                Err(e.into())
            }
        }
    }
}

impl Drop for PgSyncLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// One database transaction; rolled back if dropped before commit.
struct PgSyncTransaction {
    tx: Transaction<'static, Postgres>,
    batch_size: usize,
}

#[async_trait]
impl SyncTransaction for PgSyncTransaction {
    async fn delete_access_grants(&mut self, principals: &BTreeSet<PrincipalName>) -> Result<u64> {
        if principals.is_empty() {
            return Ok(0);
        }
        let done = sqlx::query("DELETE FROM user_radius_access WHERE principal_name = ANY($1)")
            .bind(principal_strings(principals))
            .execute(&mut *self.tx)
            .await?;

        Ok(done.rows_affected())
    }

    async fn replace_mirror(&mut self, records: &[MirrorRecord]) -> Result<()> {
        sqlx::query("TRUNCATE users_azure")
            .execute(&mut *self.tx)
            .await?;

        for (n, batch) in mirror_batches(records, self.batch_size).enumerate() {
            let mut insert = QueryBuilder::<Postgres>::new(
                "INSERT INTO users_azure (principal_name, external_id, display_name) ",
            );
            insert.push_values(batch, |mut row, record| {
                row.push_bind(record.principal_name.as_str())
                    .push_bind(record.external_id.as_str())
                    .push_bind(record.display_name.as_str());
            });
            insert.build().execute(&mut *self.tx).await?;
            tracing::debug!(batch = n + 1, rows = batch.len(), "Inserted mirror batch");
        }
        Ok(())
    }

    async fn insert_sync_event(&mut self, counts: &SyncCounts) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_events (users_added, users_updated, users_deleted, total_users)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(to_i64(counts.added))
        .bind(to_i64(counts.updated))
        .bind(to_i64(counts.deleted))
        .bind(to_i64(counts.total_users))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
