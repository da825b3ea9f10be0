//! `PlanStore` backed by the `saved_plans` table.
//!
//! Conditional updates run in a transaction: the row is read with
//! `FOR UPDATE`, the version is checked against the caller's expectation,
//! the patch is applied in process, and the full row is written back with
//! the version bumped. A stale expectation surfaces as
//! [`StoreError::VersionConflict`] without touching the row.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use itinera_core::store::{PlanPatch, PlanRecord, PlanStore, SharedCandidate, StoreError};

#[derive(Debug, Clone, FromRow)]
struct PlanRow {
    user_id: String,
    plan_id: i64,
    name: String,
    itinerary_schedules: Option<String>,
    plan_text: Option<String>,
    attrs: Json<BTreeMap<String, String>>,
    total_flights: i32,
    total_accommodations: i32,
    paid_plan: i32,
    shared_email: Option<String>,
    start_date: Option<NaiveDate>,
    version: i64,
    last_updated: DateTime<Utc>,
}

impl From<PlanRow> for PlanRecord {
    fn from(row: PlanRow) -> Self {
        Self {
            owner_id: row.user_id,
            plan_id: row.plan_id,
            name: row.name,
            itinerary_schedules: row.itinerary_schedules,
            plan_text: row.plan_text,
            attrs: row.attrs.0,
            total_flights: row.total_flights,
            total_accommodations: row.total_accommodations,
            paid_plan: row.paid_plan,
            shared_email: row.shared_email,
            start_date: row.start_date,
            version: row.version,
            last_updated: row.last_updated,
        }
    }
}

const SELECT_COLUMNS: &str = "user_id, plan_id, name, itinerary_schedules, plan_text, attrs, \
     total_flights, total_accommodations, paid_plan, shared_email, start_date, version, \
     last_updated";

/// PostgreSQL-backed plan store.
#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn get(&self, owner_id: &str, plan_id: i64) -> Result<Option<PlanRecord>, StoreError> {
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM saved_plans WHERE user_id = $1 AND plan_id = $2"
        ))
        .bind(owner_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch plan")?;

        Ok(row.map(PlanRecord::from))
    }

    async fn put(&self, record: PlanRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO saved_plans \
             (user_id, plan_id, name, itinerary_schedules, plan_text, attrs, \
              total_flights, total_accommodations, paid_plan, shared_email, \
              start_date, version, last_updated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&record.owner_id)
        .bind(record.plan_id)
        .bind(&record.name)
        .bind(&record.itinerary_schedules)
        .bind(&record.plan_text)
        .bind(Json(&record.attrs))
        .bind(record.total_flights)
        .bind(record.total_accommodations)
        .bind(record.paid_plan)
        .bind(&record.shared_email)
        .bind(record.start_date)
        .bind(record.version)
        .bind(record.last_updated)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate)
            }
            Err(err) => Err(anyhow::Error::new(err).context("failed to insert plan").into()),
        }
    }

    async fn query_newest(&self, owner_id: &str) -> Result<Option<PlanRecord>, StoreError> {
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM saved_plans WHERE user_id = $1 \
             ORDER BY last_updated DESC LIMIT 1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query newest plan")?;

        Ok(row.map(PlanRecord::from))
    }

    async fn scan_shared(&self, plan_id: i64) -> Result<Vec<SharedCandidate>, StoreError> {
        // Ordered by owner so the first-match rule is deterministic.
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT user_id, plan_id, shared_email FROM saved_plans \
             WHERE plan_id = $1 AND shared_email IS NOT NULL AND shared_email <> '' \
             ORDER BY user_id",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to scan shared plans")?;

        Ok(rows
            .into_iter()
            .map(|(owner_id, plan_id, shared_email)| SharedCandidate {
                owner_id,
                plan_id,
                shared_email,
            })
            .collect())
    }

    async fn update(
        &self,
        owner_id: &str,
        plan_id: i64,
        expected_version: i64,
        patch: PlanPatch,
    ) -> Result<PlanRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        let row: Option<PlanRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM saved_plans \
             WHERE user_id = $1 AND plan_id = $2 FOR UPDATE"
        ))
        .bind(owner_id)
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to lock plan for update")?;

        let mut record = PlanRecord::from(row.ok_or(StoreError::NotFound)?);
        if record.version != expected_version {
            debug!(
                plan_id,
                expected = expected_version,
                actual = record.version,
                "conditional update lost the race"
            );
            return Err(StoreError::VersionConflict);
        }

        patch.apply(&mut record);
        record.version = expected_version + 1;

        sqlx::query(
            "UPDATE saved_plans SET \
             name = $3, itinerary_schedules = $4, plan_text = $5, attrs = $6, \
             total_flights = $7, total_accommodations = $8, paid_plan = $9, \
             shared_email = $10, start_date = $11, version = $12, last_updated = $13 \
             WHERE user_id = $1 AND plan_id = $2",
        )
        .bind(owner_id)
        .bind(plan_id)
        .bind(&record.name)
        .bind(&record.itinerary_schedules)
        .bind(&record.plan_text)
        .bind(Json(&record.attrs))
        .bind(record.total_flights)
        .bind(record.total_accommodations)
        .bind(record.paid_plan)
        .bind(&record.shared_email)
        .bind(record.start_date)
        .bind(record.version)
        .bind(record.last_updated)
        .execute(&mut *tx)
        .await
        .context("failed to write plan update")?;

        tx.commit().await.context("failed to commit plan update")?;
        Ok(record)
    }
}
