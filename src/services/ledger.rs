//! Append-only stock movement ledger.
//!
//! Entries are written by the stock module in the same transaction as the
//! on-hand change they document. Nothing updates or deletes them afterwards.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use crate::entities::stock_movement::{self, Entity as StockMovementEntity, MovementKind};
use crate::errors::ServiceError;
use crate::services::stock::StockRef;

pub const DEFAULT_LIST_LIMIT: u64 = 100;
pub const MAX_LIST_LIMIT: u64 = 500;

/// Entry to append.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub target: StockRef,
    pub actor_id: i32,
    pub delta: i32,
    pub kind: MovementKind,
    pub reference: Option<String>,
    pub description: Option<String>,
}

pub async fn record<C: ConnectionTrait>(conn: &C, movement: NewMovement) -> Result<i32, ServiceError> {
    if movement.delta == 0 {
        return Err(ServiceError::ValidationError(
            "stock movements must change on-hand by a non-zero amount".into(),
        ));
    }

    let row = stock_movement::ActiveModel {
        product_id: Set(movement.target.product_id()),
        variant_id: Set(movement.target.variant_id()),
        actor_id: Set(movement.actor_id),
        delta: Set(movement.delta),
        kind: Set(movement.kind),
        reference: Set(movement.reference),
        description: Set(movement.description),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    debug!(movement_id = row.id, target = %movement.target, delta = row.delta, kind = %row.kind, "stock movement recorded");
    Ok(row.id)
}

/// Query filters for [`list`].
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovementFilter {
    pub kind: Option<MovementKind>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    pub reference: Option<String>,
    /// Defaults to 100, capped at 500
    pub limit: Option<u64>,
}

/// A ledger entry as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MovementView {
    pub id: i32,
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    pub actor_id: i32,
    pub delta: i32,
    pub kind: MovementKind,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<stock_movement::Model> for MovementView {
    fn from(model: stock_movement::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            variant_id: model.variant_id,
            actor_id: model.actor_id,
            delta: model.delta,
            kind: model.kind,
            reference: model.reference,
            description: model.description,
            created_at: model.created_at,
        }
    }
}

/// Newest first.
pub async fn list<C: ConnectionTrait>(conn: &C, filter: &MovementFilter) -> Result<Vec<MovementView>, ServiceError> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(ServiceError::ValidationError(
                "'from' must not be later than 'to'".into(),
            ));
        }
    }

    let mut query = StockMovementEntity::find();
    if let Some(kind) = filter.kind {
        query = query.filter(stock_movement::Column::Kind.eq(kind));
    }
    if let Some(from) = filter.from {
        query = query.filter(stock_movement::Column::CreatedAt.gte(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(stock_movement::Column::CreatedAt.lt(to));
    }
    if let Some(product_id) = filter.product_id {
        query = query.filter(stock_movement::Column::ProductId.eq(product_id));
    }
    if let Some(variant_id) = filter.variant_id {
        query = query.filter(stock_movement::Column::VariantId.eq(variant_id));
    }
    if let Some(reference) = &filter.reference {
        query = query.filter(stock_movement::Column::Reference.eq(reference.as_str()));
    }

    let limit = filter
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let rows = query
        .order_by_desc(stock_movement::Column::CreatedAt)
        .order_by_desc(stock_movement::Column::Id)
        .limit(limit)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(rows.into_iter().map(MovementView::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::setup_db;
    use assert_matches::assert_matches;

    fn entry(target: StockRef, delta: i32, kind: MovementKind, reference: &str) -> NewMovement {
        NewMovement {
            target,
            actor_id: 1,
            delta,
            kind,
            reference: Some(reference.into()),
            description: None,
        }
    }

    #[tokio::test]
    async fn zero_delta_is_rejected() {
        let db = setup_db().await;
        let result = record(&db, entry(StockRef::Product(1), 0, MovementKind::Adjustment, "x")).await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let db = setup_db().await;
        record(&db, entry(StockRef::Product(1), 5, MovementKind::Inflow, "a")).await.unwrap();
        record(&db, entry(StockRef::Variant(2), -2, MovementKind::Outflow, "VTA-1")).await.unwrap();
        record(&db, entry(StockRef::Product(1), -1, MovementKind::Outflow, "VTA-2")).await.unwrap();

        let all = list(&db, &MovementFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].reference.as_deref(), Some("VTA-2"));

        let outflows = list(
            &db,
            &MovementFilter {
                kind: Some(MovementKind::Outflow),
                product_id: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(outflows.len(), 1);
        assert_eq!(outflows[0].delta, -1);

        let limited = list(&db, &MovementFilter { limit: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let db = setup_db().await;
        let now = Utc::now();
        let filter = MovementFilter {
            from: Some(now),
            to: Some(now - chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert_matches!(list(&db, &filter).await, Err(ServiceError::ValidationError(_)));
    }
}
