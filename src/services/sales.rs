//! Walk-in sales and the sales register.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::db::with_retrying_transaction;
use crate::entities::sale::{self, Entity as SaleEntity, PaymentMethod, SaleOrigin, SaleStatus};
use crate::entities::sale_line::{self, Entity as SaleLineEntity};
use crate::entities::user;
use crate::errors::ServiceError;
use crate::middleware_helpers::retry::RetryConfig;
use crate::services::codes;
use crate::services::reservations::LineView;
use crate::services::stock::{self, LedgerNote, LineRequest};

pub const MAX_PER_PAGE: u64 = 100;
const DIRECT_SALE_DESCRIPTION: &str = "Direct sale";

/// Input for [`SaleService::create_direct`].
#[derive(Debug, Clone)]
pub struct NewDirectSale {
    pub buyer_id: Option<i32>,
    pub lines: Vec<LineRequest>,
    pub payment_method: PaymentMethod,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleReceipt {
    pub sale_id: i32,
    pub code: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleSummary {
    pub id: i32,
    pub code: String,
    pub origin: SaleOrigin,
    pub reservation_id: Option<i32>,
    pub buyer_id: Option<i32>,
    pub operator_id: i32,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<sale::Model> for SaleSummary {
    fn from(model: sale::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            origin: model.origin,
            reservation_id: model.reservation_id,
            buyer_id: model.buyer_id,
            operator_id: model.operator_id,
            total: model.total,
            payment_method: model.payment_method,
            status: model.status,
            note: model.note,
            created_at: model.created_at,
        }
    }
}

impl From<sale_line::Model> for LineView {
    fn from(line: sale_line::Model) -> Self {
        Self {
            product_id: line.product_id,
            variant_id: line.variant_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal: line.subtotal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleDetail {
    pub sale: SaleSummary,
    pub lines: Vec<LineView>,
}

/// Filters for [`SaleService::list`]. `page` is 1-based; `to` is exclusive.
#[derive(Debug, Clone)]
pub struct SaleQuery {
    pub origin: Option<SaleOrigin>,
    pub status: Option<SaleStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Clone)]
pub struct SaleService {
    db: Arc<DatabaseConnection>,
    retry: RetryConfig,
}

impl SaleService {
    pub fn new(db: Arc<DatabaseConnection>, retry: RetryConfig) -> Self {
        Self { db, retry }
    }

    /// Sells unreserved stock over the counter.
    ///
    /// Units held by active reservations are never available to a direct
    /// sale: each line is checked against `on_hand - reserved`.
    #[instrument(skip(self, input), fields(operator_id = operator.user_id, lines = input.lines.len()))]
    pub async fn create_direct(&self, operator: &AuthUser, input: NewDirectSale) -> Result<SaleReceipt, ServiceError> {
        if !operator.is_staff() {
            return Err(ServiceError::Forbidden("only staff can register sales".into()));
        }
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError("a sale needs at least one line".into()));
        }

        let operator_id = operator.user_id;
        let receipt = with_retrying_transaction(&self.db, &self.retry, move |txn| {
            let input = input.clone();
            Box::pin(async move {
                if let Some(buyer_id) = input.buyer_id {
                    user::Entity::find_by_id(buyer_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| ServiceError::NotFound(format!("Buyer {} not found", buyer_id)))?;
                }

                let code = codes::sale_code();
                let mut priced = Vec::with_capacity(input.lines.len());
                for request in input.lines {
                    let line = stock::price_line(txn, request).await?;
                    stock::withdraw(
                        txn,
                        line.target,
                        line.quantity,
                        LedgerNote::outflow(operator_id, code.clone(), DIRECT_SALE_DESCRIPTION),
                    )
                    .await?;
                    priced.push(line);
                }
                let total: Decimal = priced.iter().map(|line| line.subtotal).sum();

                let sale = sale::ActiveModel {
                    code: Set(code),
                    origin: Set(SaleOrigin::Direct),
                    reservation_id: Set(None),
                    buyer_id: Set(input.buyer_id),
                    operator_id: Set(operator_id),
                    total: Set(total),
                    payment_method: Set(input.payment_method),
                    status: Set(SaleStatus::Paid),
                    note: Set(input.note),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?;

                for line in &priced {
                    sale_line::ActiveModel {
                        sale_id: Set(sale.id),
                        product_id: Set(line.target.product_id()),
                        variant_id: Set(line.target.variant_id()),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        subtotal: Set(line.subtotal),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                }

                Ok(SaleReceipt {
                    sale_id: sale.id,
                    code: sale.code,
                    total: sale.total,
                })
            })
        })
        .await?;

        counter!("ortomediq.sales.direct", 1);
        info!(sale_id = receipt.sale_id, code = %receipt.code, total = %receipt.total, "Direct sale registered");
        Ok(receipt)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, sale_id: i32) -> Result<SaleDetail, ServiceError> {
        let db = &*self.db;
        let sale = SaleEntity::find_by_id(sale_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", sale_id)))?;
        let lines = SaleLineEntity::find()
            .filter(sale_line::Column::SaleId.eq(sale_id))
            .order_by_asc(sale_line::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(SaleDetail {
            sale: sale.into(),
            lines: lines.into_iter().map(LineView::from).collect(),
        })
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list(&self, query: SaleQuery) -> Result<(Vec<SaleSummary>, u64), ServiceError> {
        if query.page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if query.per_page == 0 || query.per_page > MAX_PER_PAGE {
            return Err(ServiceError::ValidationError(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }

        let mut select = SaleEntity::find();
        if let Some(origin) = query.origin {
            select = select.filter(sale::Column::Origin.eq(origin));
        }
        if let Some(status) = query.status {
            select = select.filter(sale::Column::Status.eq(status));
        }
        if let Some(from) = query.from {
            select = select.filter(sale::Column::CreatedAt.gte(from));
        }
        if let Some(to) = query.to {
            select = select.filter(sale::Column::CreatedAt.lt(to));
        }

        let paginator = select
            .order_by_desc(sale::Column::CreatedAt)
            .order_by_desc(sale::Column::Id)
            .paginate(&*self.db, query.per_page);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(query.page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((rows.into_iter().map(SaleSummary::from).collect(), total))
    }
}
