use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::matching::{PairingStore, PairingTxn, PoolStats};
use crate::websocket::ConnectionId;

/// Key of the transaction-scoped advisory lock that serialises every
/// pairing transaction across processes sharing the database.
const PAIRING_LOCK_KEY: i64 = 0x5354_524e_4752;

const CREATE_WAITING: &str = r#"
    CREATE UNLOGGED TABLE IF NOT EXISTS strangers_waiting (
        conn_id UUID PRIMARY KEY
    )
"#;

const CREATE_PARTNERS: &str = r#"
    CREATE UNLOGGED TABLE IF NOT EXISTS strangers_partners (
        conn_id UUID PRIMARY KEY,
        partner_id UUID NOT NULL
    )
"#;

/// Pairing store shared through Postgres. Both tables are unlogged: they
/// hold only live-session state and are emptied on startup.
pub struct PgPairingStore {
    pool: Arc<PgPool>,
}

impl PgPairingStore {
    /// Builds the pool without connecting, so an unreachable database shows
    /// up as per-operation errors rather than a startup failure.
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_WAITING).execute(self.pool.as_ref()).await?;
        sqlx::query(CREATE_PARTNERS).execute(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Drops every waiting entry and pairing.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut tx = self.lock().await?;
        sqlx::query("TRUNCATE strangers_waiting, strangers_partners")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("Cleared pairing tables");
        Ok(())
    }

    async fn lock(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(PAIRING_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl PairingStore for PgPairingStore {
    async fn begin(&self) -> Result<Box<dyn PairingTxn>, StoreError> {
        let tx = self.lock().await?;
        Ok(Box::new(PgTxn { tx }))
    }

    async fn partner_of(&self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        let partner = sqlx::query_scalar::<_, Uuid>(
            "SELECT partner_id FROM strangers_partners WHERE conn_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(partner.map(ConnectionId::from))
    }

    async fn is_waiting(&self, id: ConnectionId) -> Result<bool, StoreError> {
        let waiting = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM strangers_waiting WHERE conn_id = $1)",
        )
        .bind(id.as_uuid())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(waiting)
    }

    async fn stats(&self) -> Result<PoolStats, StoreError> {
        let (waiting, partners) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM strangers_waiting),
                (SELECT COUNT(*) FROM strangers_partners)
            "#,
        )
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(PoolStats {
            waiting: waiting as usize,
            paired: (partners / 2) as usize,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Closed pairing store pool");
    }
}

/// Rolled back when dropped without `commit`.
struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PairingTxn for PgTxn {
    async fn pop_waiting(&mut self) -> Result<Option<ConnectionId>, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM strangers_waiting
            WHERE conn_id = (SELECT conn_id FROM strangers_waiting ORDER BY random() LIMIT 1)
            RETURNING conn_id
            "#,
        )
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(id.map(ConnectionId::from))
    }

    async fn push_waiting(&mut self, id: ConnectionId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO strangers_waiting (conn_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn remove_waiting(&mut self, id: ConnectionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM strangers_waiting WHERE conn_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn partner_of(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        let partner = sqlx::query_scalar::<_, Uuid>(
            "SELECT partner_id FROM strangers_partners WHERE conn_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(partner.map(ConnectionId::from))
    }

    async fn set_pair(&mut self, a: ConnectionId, b: ConnectionId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO strangers_partners (conn_id, partner_id)
            VALUES ($1, $2), ($2, $1)
            ON CONFLICT (conn_id) DO UPDATE SET partner_id = EXCLUDED.partner_id
            "#,
        )
        .bind(a.as_uuid())
        .bind(b.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn take_partner(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        let partner = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM strangers_partners WHERE conn_id = $1 RETURNING partner_id",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(partner.map(ConnectionId::from))
    }

    async fn remove_partner_if(&mut self, id: ConnectionId, expected: ConnectionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM strangers_partners WHERE conn_id = $1 AND partner_id = $2")
            .bind(id.as_uuid())
            .bind(expected.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTxn { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
