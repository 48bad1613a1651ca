//! PostgreSQL storage backend.
//!
//! Every enabled rate type gets its own table, named after its
//! [`Namespace`]. A `BIGSERIAL` column records insertion order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use ratekeeper_common::{
    CorrectionCorridor, CorrectionRule, CorrectionSnapshot, CurrencyPair, DelayedTrigger,
    ExchangeDirection, MerchantId, Namespace, RateObservation, RateType, RateTypeRegistry,
    RatesError, Result, RuleId, RuleScope, Timestamp, TriggerKind,
};

use crate::traits::{CorrectionStore, CorridorStore, RateQuery, RateStore, RuleStore, TriggerStore};

const SUPPORT_TABLES: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS correction_rules (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        rate_type TEXT NOT NULL,
        direction TEXT NOT NULL,
        merchant_id TEXT,
        common_correction NUMERIC NOT NULL,
        pair_correction TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS correction_corridors (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        value NUMERIC NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS correction_snapshots (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        pair TEXT NOT NULL,
        value NUMERIC NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS delayed_triggers (
        kind TEXT PRIMARY KEY,
        active BOOLEAN NOT NULL
    )",
];

fn db_err(e: sqlx::Error) -> RatesError {
    RatesError::Storage(e.to_string())
}

fn rates_table(ns: Namespace) -> [String; 2] {
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {ns} (
                seq BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                pair TEXT NOT NULL,
                source TEXT NOT NULL,
                rate NUMERIC NOT NULL,
                volume NUMERIC NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS {ns}_pair_created_idx ON {ns} (pair, created_at)"),
    ]
}

/// Postgres-backed implementation of every storage trait.
pub struct PgStore {
    pool: PgPool,
    registry: RateTypeRegistry,
}

impl PgStore {
    /// Connect to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        registry: RateTypeRegistry,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self::with_pool(pool, registry))
    }

    pub fn with_pool(pool: PgPool, registry: RateTypeRegistry) -> Self {
        Self { pool, registry }
    }

    /// Create any missing tables for the enabled namespaces.
    pub async fn prepare(&self) -> Result<()> {
        let statements = self
            .registry
            .namespaces()
            .flat_map(rates_table)
            .chain(SUPPORT_TABLES.iter().map(|s| s.to_string()));
        for statement in statements {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        info!(
            namespaces = self.registry.namespaces().count(),
            "Storage schema ready"
        );
        Ok(())
    }

    fn observation_from_row(rate_type: RateType, row: &PgRow) -> Result<RateObservation> {
        let pair: String = row.try_get("pair").map_err(db_err)?;
        Ok(RateObservation {
            id: row.try_get("id").map_err(db_err)?,
            pair: CurrencyPair::parse(&pair)?,
            rate_type,
            source: row.try_get("source").map_err(db_err)?,
            rate: row.try_get("rate").map_err(db_err)?,
            volume: row.try_get("volume").map_err(db_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }

    fn rule_from_row(row: &PgRow) -> Result<CorrectionRule> {
        let rate_type: String = row.try_get("rate_type").map_err(db_err)?;
        let direction: String = row.try_get("direction").map_err(db_err)?;
        let merchant: Option<String> = row.try_get("merchant_id").map_err(db_err)?;
        let pairs: String = row.try_get("pair_correction").map_err(db_err)?;
        let pair_correction: BTreeMap<String, Decimal> = serde_json::from_str(&pairs)
            .map_err(|e| RatesError::Storage(format!("corrupt pair_correction: {e}")))?;
        let id: Uuid = row.try_get("id").map_err(db_err)?;

        Ok(CorrectionRule {
            id: RuleId::from_uuid(id),
            rate_type: rate_type.parse()?,
            direction: direction.parse()?,
            scope: RuleScope::for_merchant(merchant.map(MerchantId::new)),
            common_correction: row.try_get("common_correction").map_err(db_err)?,
            pair_correction,
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }
}

#[async_trait]
impl RateStore for PgStore {
    async fn insert(&self, observation: RateObservation) -> Result<()> {
        self.insert_many(vec![observation]).await
    }

    async fn insert_many(&self, observations: Vec<RateObservation>) -> Result<()> {
        let targets = observations
            .iter()
            .map(|o| self.registry.namespace(o.rate_type))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (ns, o) in targets.into_iter().zip(&observations) {
            let sql = format!(
                "INSERT INTO {ns} (id, pair, source, rate, volume, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)"
            );
            sqlx::query(&sql)
                .bind(o.id)
                .bind(o.pair.code())
                .bind(&o.source)
                .bind(o.rate)
                .bind(o.volume)
                .bind(o.created_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(count = observations.len(), "Stored observations");
        Ok(())
    }

    async fn latest(&self, query: &RateQuery) -> Result<Option<RateObservation>> {
        let ns = self.registry.namespace(query.rate_type)?;
        let order = if query.until.is_some() {
            "created_at DESC, seq DESC"
        } else {
            "seq DESC"
        };
        let sql = format!(
            "SELECT id, pair, source, rate, volume, created_at FROM {ns} \
             WHERE pair = $1 \
               AND ($2::TEXT IS NULL OR source = $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR created_at <= $3) \
             ORDER BY {order} LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(query.pair.code())
            .bind(query.source.clone())
            .bind(query.until)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| Self::observation_from_row(query.rate_type, &r))
            .transpose()
    }

    async fn range(
        &self,
        rate_type: RateType,
        pair: &CurrencyPair,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<RateObservation>> {
        let ns = self.registry.namespace(rate_type)?;
        let sql = format!(
            "SELECT id, pair, source, rate, volume, created_at FROM {ns} \
             WHERE pair = $1 AND created_at >= $2 AND created_at <= $3 \
             ORDER BY created_at ASC, seq ASC"
        );

        let rows = sqlx::query(&sql)
            .bind(pair.code())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(|r| Self::observation_from_row(rate_type, r))
            .collect()
    }
}

#[async_trait]
impl RuleStore for PgStore {
    async fn insert_rule(&self, rule: CorrectionRule) -> Result<()> {
        self.registry.namespace(rule.rate_type)?;
        let pairs = serde_json::to_string(&rule.pair_correction)
            .map_err(|e| RatesError::Storage(e.to_string()))?;
        let merchant = match &rule.scope {
            RuleScope::Global => None,
            RuleScope::Merchant(id) => Some(id.as_str().to_string()),
        };

        sqlx::query(
            "INSERT INTO correction_rules \
             (id, rate_type, direction, merchant_id, common_correction, pair_correction, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*rule.id.as_uuid())
        .bind(rule.rate_type.as_str())
        .bind(rule.direction.as_str())
        .bind(merchant)
        .bind(rule.common_correction)
        .bind(pairs)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn rules_for(
        &self,
        rate_type: RateType,
        direction: ExchangeDirection,
    ) -> Result<Vec<CorrectionRule>> {
        let rows = sqlx::query(
            "SELECT id, rate_type, direction, merchant_id, common_correction, pair_correction, created_at \
             FROM correction_rules WHERE rate_type = $1 AND direction = $2 ORDER BY seq ASC",
        )
        .bind(rate_type.as_str())
        .bind(direction.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::rule_from_row).collect()
    }
}

#[async_trait]
impl CorridorStore for PgStore {
    async fn insert_corridor(&self, corridor: CorrectionCorridor) -> Result<()> {
        sqlx::query("INSERT INTO correction_corridors (id, value, created_at) VALUES ($1, $2, $3)")
            .bind(corridor.id)
            .bind(corridor.value)
            .bind(corridor.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn latest_corridor(&self) -> Result<Option<CorrectionCorridor>> {
        let row = sqlx::query(
            "SELECT id, value, created_at FROM correction_corridors ORDER BY seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| -> Result<CorrectionCorridor> {
            Ok(CorrectionCorridor {
                id: r.try_get("id").map_err(db_err)?,
                value: r.try_get("value").map_err(db_err)?,
                created_at: r.try_get("created_at").map_err(db_err)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl CorrectionStore for PgStore {
    async fn insert_snapshots(&self, snapshots: Vec<CorrectionSnapshot>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for s in &snapshots {
            sqlx::query(
                "INSERT INTO correction_snapshots (id, pair, value, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(s.id)
            .bind(s.pair.code())
            .bind(s.value)
            .bind(s.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn latest_snapshot(&self, pair: &CurrencyPair) -> Result<Option<CorrectionSnapshot>> {
        let row = sqlx::query(
            "SELECT id, pair, value, created_at FROM correction_snapshots \
             WHERE pair = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(pair.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| -> Result<CorrectionSnapshot> {
            let code: String = r.try_get("pair").map_err(db_err)?;
            Ok(CorrectionSnapshot {
                id: r.try_get("id").map_err(db_err)?,
                pair: CurrencyPair::parse(&code)?,
                value: r.try_get("value").map_err(db_err)?,
                created_at: r.try_get("created_at").map_err(db_err)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl TriggerStore for PgStore {
    async fn trigger(&self, kind: TriggerKind) -> Result<DelayedTrigger> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM delayed_triggers WHERE kind = $1")
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(DelayedTrigger {
            kind,
            active: active.unwrap_or(false),
        })
    }

    async fn set_active(&self, kind: TriggerKind, active: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO delayed_triggers (kind, active) VALUES ($1, $2) \
             ON CONFLICT (kind) DO UPDATE SET active = EXCLUDED.active",
        )
        .bind(kind.as_str())
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
