use crate::entities::{
    herb, patient, recommendation,
    recommendation::RecommendationStatus,
    reconciliation_task,
    reconciliation_task::{TaskStatus, TaskType},
};
use crate::errors::ServiceError;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: i32 = 8;
const CLAIM_BATCH: u64 = 16;

/// Payload for a `stock_decrement` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct StockDecrementPayload {
    pub herb_id: Uuid,
    pub quantity: i32,
}

/// Payload for a `recommendation_status` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationStatusPayload {
    pub recommendation_id: Uuid,
    pub status: String,
}

/// Payload for a `patient_defaults` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct PatientDefaultsPayload {
    pub patient_id: Uuid,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
}

/// Persists a deferred repair task. Called when a post-commit side
/// effect of order materialization fails.
pub async fn enqueue(
    db: &DatabaseConnection,
    order_id: Uuid,
    task_type: TaskType,
    payload: serde_json::Value,
) -> Result<Uuid, ServiceError> {
    let id = Uuid::new_v4();
    let task = reconciliation_task::ActiveModel {
        id: Set(id),
        order_id: Set(order_id),
        task_type: Set(task_type.to_string()),
        payload: Set(payload.to_string()),
        status: Set(TaskStatus::Pending.to_string()),
        attempts: Set(0),
        last_error: Set(None),
        available_at: Set(Utc::now()),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    task.insert(db).await?;
    warn!(%order_id, task_type = %task_type, "reconciliation task enqueued");
    Ok(id)
}

/// Background worker that replays failed ancillary effects with
/// exponential backoff until they succeed or exhaust their attempts.
#[derive(Clone)]
pub struct ReconciliationWorker {
    db: Arc<DatabaseConnection>,
}

impl ReconciliationWorker {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn run(self, poll_interval: Duration) {
        info!("Reconciliation worker started");
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.process_due_tasks().await {
                error!(error = %e, "reconciliation pass failed");
            }
        }
    }

    /// One polling pass: claim due pending tasks and execute them.
    #[instrument(skip(self))]
    pub async fn process_due_tasks(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let due = reconciliation_task::Entity::find()
            .filter(reconciliation_task::Column::Status.eq(TaskStatus::Pending.to_string()))
            .filter(reconciliation_task::Column::AvailableAt.lte(now))
            .order_by_asc(reconciliation_task::Column::AvailableAt)
            .limit(CLAIM_BATCH)
            .all(self.db.as_ref())
            .await?;

        let mut processed = 0;
        for task in due {
            // Guarded claim: another worker may have taken it first.
            let claimed = reconciliation_task::Entity::update_many()
                .col_expr(
                    reconciliation_task::Column::Status,
                    Expr::value(TaskStatus::Processing.to_string()),
                )
                .col_expr(reconciliation_task::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(reconciliation_task::Column::Id.eq(task.id))
                .filter(reconciliation_task::Column::Status.eq(TaskStatus::Pending.to_string()))
                .exec(self.db.as_ref())
                .await?;
            if claimed.rows_affected == 0 {
                continue;
            }

            match self.execute(&task).await {
                Ok(()) => {
                    self.mark(task.id, TaskStatus::Done, task.attempts + 1, None)
                        .await?;
                    info!(task_id = %task.id, task_type = %task.task_type, "reconciliation task done");
                }
                Err(e) => {
                    let attempts = task.attempts + 1;
                    if attempts >= MAX_ATTEMPTS {
                        self.mark(task.id, TaskStatus::Failed, attempts, Some(e.to_string()))
                            .await?;
                        error!(task_id = %task.id, attempts, error = %e, "reconciliation task failed permanently");
                    } else {
                        self.retry_later(task.id, attempts, e.to_string()).await?;
                        warn!(task_id = %task.id, attempts, error = %e, "reconciliation task retry scheduled");
                    }
                }
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn execute(&self, task: &reconciliation_task::Model) -> Result<(), ServiceError> {
        let task_type = TaskType::from_str(&task.task_type)
            .map_err(|_| ServiceError::InternalError(format!("unknown task type {}", task.task_type)))?;

        match task_type {
            TaskType::StockDecrement => {
                let payload: StockDecrementPayload = serde_json::from_str(&task.payload)?;
                decrement_stock(self.db.as_ref(), payload.herb_id, payload.quantity).await
            }
            TaskType::RecommendationStatus => {
                let payload: RecommendationStatusPayload = serde_json::from_str(&task.payload)?;
                let status = RecommendationStatus::from_str(&payload.status).map_err(|_| {
                    ServiceError::InternalError(format!("unknown status {}", payload.status))
                })?;
                advance_recommendation(self.db.as_ref(), payload.recommendation_id, status).await?;
                Ok(())
            }
            TaskType::PatientDefaults => {
                let payload: PatientDefaultsPayload = serde_json::from_str(&task.payload)?;
                update_patient_defaults(self.db.as_ref(), &payload).await
            }
        }
    }

    async fn mark(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<(), ServiceError> {
        reconciliation_task::Entity::update_many()
            .col_expr(
                reconciliation_task::Column::Status,
                Expr::value(status.to_string()),
            )
            .col_expr(reconciliation_task::Column::Attempts, Expr::value(attempts))
            .col_expr(reconciliation_task::Column::LastError, Expr::value(last_error))
            .col_expr(reconciliation_task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(reconciliation_task::Column::Id.eq(task_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn retry_later(
        &self,
        task_id: Uuid,
        attempts: i32,
        last_error: String,
    ) -> Result<(), ServiceError> {
        let delay = ChronoDuration::seconds(2_i64.pow(attempts.min(16) as u32));
        reconciliation_task::Entity::update_many()
            .col_expr(
                reconciliation_task::Column::Status,
                Expr::value(TaskStatus::Pending.to_string()),
            )
            .col_expr(reconciliation_task::Column::Attempts, Expr::value(attempts))
            .col_expr(
                reconciliation_task::Column::LastError,
                Expr::value(Some(last_error)),
            )
            .col_expr(
                reconciliation_task::Column::AvailableAt,
                Expr::value(Utc::now() + delay),
            )
            .col_expr(reconciliation_task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(reconciliation_task::Column::Id.eq(task_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}

/// Single-statement atomic decrement. Also used directly by the order
/// materializer for its first attempt.
pub async fn decrement_stock<C: ConnectionTrait>(
    db: &C,
    herb_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = herb::Entity::update_many()
        .col_expr(
            herb::Column::StockQuantity,
            Expr::col(herb::Column::StockQuantity).sub(quantity),
        )
        .col_expr(herb::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(herb::Column::Id.eq(herb_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!("herb {}", herb_id)));
    }
    Ok(())
}

/// Forward-only recommendation status advance. Returns whether a row
/// actually moved; already-later statuses are untouched.
pub async fn advance_recommendation<C: ConnectionTrait>(
    db: &C,
    recommendation_id: Uuid,
    to: RecommendationStatus,
) -> Result<bool, ServiceError> {
    let earlier: Vec<String> = [
        RecommendationStatus::Draft,
        RecommendationStatus::PaymentPending,
        RecommendationStatus::Paid,
        RecommendationStatus::Completed,
    ]
    .into_iter()
    .filter(|s| s.rank() < to.rank())
    .map(|s| s.to_string())
    .collect();

    let result = recommendation::Entity::update_many()
        .col_expr(recommendation::Column::Status, Expr::value(to.to_string()))
        .col_expr(recommendation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(recommendation::Column::Id.eq(recommendation_id))
        .filter(recommendation::Column::Status.is_in(earlier))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

pub async fn update_patient_defaults<C: ConnectionTrait>(
    db: &C,
    payload: &PatientDefaultsPayload,
) -> Result<(), ServiceError> {
    let result = patient::Entity::update_many()
        .col_expr(
            patient::Column::DefaultShippingAddress,
            Expr::value(payload.address.clone()),
        )
        .col_expr(
            patient::Column::DefaultShippingCity,
            Expr::value(payload.city.clone()),
        )
        .col_expr(
            patient::Column::DefaultShippingPostalCode,
            Expr::value(payload.postal_code.clone()),
        )
        .col_expr(
            patient::Column::DefaultShippingPhone,
            Expr::value(payload.phone.clone()),
        )
        .col_expr(patient::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(patient::Column::Id.eq(payload.patient_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "patient {}",
            payload.patient_id
        )));
    }
    Ok(())
}

/// Convenience constructor for a stock-decrement payload.
pub fn stock_decrement_payload(herb_id: Uuid, quantity: i32) -> serde_json::Value {
    json!({ "herb_id": herb_id, "quantity": quantity })
}
