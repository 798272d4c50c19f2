//! Reservation ("apartado") lifecycle.
//!
//! A reservation holds stock for a customer without selling it: creation
//! raises `reserved`, cancellation and expiration lower it again, and
//! conversion turns the held units into a sale that leaves the shelf.
//! Every operation is one retrying transactional unit and every status change
//! is a compare-and-set on `status = 'active'`, so two racing terminal
//! transitions can never both release or sell the same units.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::db::with_retrying_transaction;
use crate::entities::reservation::{self, Entity as ReservationEntity, ReservationStatus};
use crate::entities::reservation_line::{self, Entity as ReservationLineEntity};
use crate::entities::sale::{self, PaymentMethod, SaleOrigin, SaleStatus};
use crate::entities::sale_line;
use crate::errors::ServiceError;
use crate::middleware_helpers::retry::RetryConfig;
use crate::services::codes;
use crate::services::sales::SaleReceipt;
use crate::services::stock::{self, LedgerNote, LineRequest, StockRef};

pub const MAX_PER_PAGE: u64 = 100;

/// Input for [`ReservationService::create`].
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub lines: Vec<LineRequest>,
    pub note: Option<String>,
}

/// Returned after a reservation is placed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationReceipt {
    pub reservation_id: i32,
    pub code: String,
    pub total: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// Priced line of a reservation or a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LineView {
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl From<reservation_line::Model> for LineView {
    fn from(line: reservation_line::Model) -> Self {
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
pub struct ReservationSummary {
    pub id: i32,
    pub code: String,
    pub owner_id: i32,
    pub status: ReservationStatus,
    pub total: Decimal,
    pub expires_at: DateTime<Utc>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<reservation::Model> for ReservationSummary {
    fn from(model: reservation::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            owner_id: model.owner_id,
            status: model.status,
            total: model.total,
            expires_at: model.expires_at,
            note: model.note,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationDetail {
    pub reservation: ReservationSummary,
    pub lines: Vec<LineView>,
}

/// Filters for [`ReservationService::list`]. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct ReservationQuery {
    pub status: Option<ReservationStatus>,
    pub page: u64,
    pub per_page: u64,
}

/// Confirms that the caller may review the items of a reservation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewEligibility {
    pub reservation_id: i32,
    pub code: String,
    pub eligible: bool,
}

/// Moves an active reservation to `next`. Returns `false` when the row was
/// no longer active, in which case nothing changed.
pub(crate) async fn close_if_active<C: ConnectionTrait>(
    conn: &C,
    reservation_id: i32,
    next: ReservationStatus,
) -> Result<bool, ServiceError> {
    debug_assert!(ReservationStatus::Active.can_transition_to(next));
    let result = ReservationEntity::update_many()
        .col_expr(reservation::Column::Status, Expr::value(next))
        .col_expr(reservation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(reservation::Column::Id.eq(reservation_id))
        .filter(reservation::Column::Status.eq(ReservationStatus::Active))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected == 1)
}

pub(crate) async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    reservation_id: i32,
) -> Result<Vec<reservation_line::Model>, ServiceError> {
    ReservationLineEntity::find()
        .filter(reservation_line::Column::ReservationId.eq(reservation_id))
        .order_by_asc(reservation_line::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Gives every held unit of a reservation back to the available pool.
pub(crate) async fn release_lines<C: ConnectionTrait>(conn: &C, reservation_id: i32) -> Result<(), ServiceError> {
    for line in load_lines(conn, reservation_id).await? {
        let target = StockRef::from_parts(line.product_id, line.variant_id)?;
        stock::release(conn, target, line.quantity).await?;
    }
    Ok(())
}

async fn find_reservation<C: ConnectionTrait>(conn: &C, reservation_id: i32) -> Result<reservation::Model, ServiceError> {
    ReservationEntity::find_by_id(reservation_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Reservation {} not found", reservation_id)))
}

fn ensure_can_see(actor: &AuthUser, reservation: &reservation::Model) -> Result<(), ServiceError> {
    if actor.can_access_owned(reservation.owner_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "Reservation {} belongs to another customer",
            reservation.code
        )))
    }
}

fn not_active(reservation: &reservation::Model) -> ServiceError {
    ServiceError::InvalidState(format!(
        "Reservation {} is {}, only active reservations can change",
        reservation.code, reservation.status
    ))
}

#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    retry: RetryConfig,
    horizon: Duration,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>, retry: RetryConfig, horizon: Duration) -> Self {
        Self { db, retry, horizon }
    }

    /// Places a reservation owned by `owner`, holding every requested unit.
    #[instrument(skip(self, input), fields(owner_id = owner.user_id, lines = input.lines.len()))]
    pub async fn create(&self, owner: &AuthUser, input: NewReservation) -> Result<ReservationReceipt, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a reservation needs at least one line".into(),
            ));
        }

        let owner_id = owner.user_id;
        let horizon = self.horizon;
        let receipt = with_retrying_transaction(&self.db, &self.retry, move |txn| {
            let requests = input.lines.clone();
            let note = input.note.clone();
            Box::pin(async move {
                // Lines are priced and held one by one so repeated references
                // to the same row see the units already held by earlier lines.
                let mut priced = Vec::with_capacity(requests.len());
                for request in requests {
                    let line = stock::price_line(txn, request).await?;
                    stock::reserve(txn, line.target, line.quantity).await?;
                    priced.push(line);
                }
                let total: Decimal = priced.iter().map(|line| line.subtotal).sum();

                let reservation = reservation::ActiveModel {
                    code: Set(codes::reservation_code()),
                    owner_id: Set(owner_id),
                    status: Set(ReservationStatus::Active),
                    total: Set(total),
                    expires_at: Set(Utc::now() + horizon),
                    note: Set(note),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?;

                for line in &priced {
                    reservation_line::ActiveModel {
                        reservation_id: Set(reservation.id),
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

                Ok(ReservationReceipt {
                    reservation_id: reservation.id,
                    code: reservation.code,
                    total: reservation.total,
                    expires_at: reservation.expires_at,
                })
            })
        })
        .await?;

        counter!("ortomediq.reservations.created", 1);
        info!(reservation_id = receipt.reservation_id, code = %receipt.code, total = %receipt.total, "Reservation created");
        Ok(receipt)
    }

    /// Cancels an active reservation and releases its held units.
    #[instrument(skip(self), fields(actor_id = actor.user_id))]
    pub async fn cancel(&self, reservation_id: i32, actor: &AuthUser) -> Result<(), ServiceError> {
        let actor = *actor;
        let code = with_retrying_transaction(&self.db, &self.retry, move |txn| {
            Box::pin(async move {
                let reservation = find_reservation(txn, reservation_id).await?;
                ensure_can_see(&actor, &reservation)?;
                if !close_if_active(txn, reservation_id, ReservationStatus::Canceled).await? {
                    return Err(not_active(&reservation));
                }
                release_lines(txn, reservation_id).await?;
                Ok(reservation.code)
            })
        })
        .await?;

        counter!("ortomediq.reservations.canceled", 1);
        info!(reservation_id, code = %code, "Reservation canceled");
        Ok(())
    }

    /// Sells the held units of an active reservation to its owner.
    #[instrument(skip(self, note), fields(actor_id = actor.user_id))]
    pub async fn convert_to_sale(
        &self,
        reservation_id: i32,
        actor: &AuthUser,
        payment_method: PaymentMethod,
        note: Option<String>,
    ) -> Result<SaleReceipt, ServiceError> {
        if !actor.is_staff() {
            return Err(ServiceError::Forbidden(
                "only staff can convert reservations into sales".into(),
            ));
        }

        let operator_id = actor.user_id;
        let receipt = with_retrying_transaction(&self.db, &self.retry, move |txn| {
            let note = note.clone();
            Box::pin(async move {
                let reservation = find_reservation(txn, reservation_id).await?;
                if !close_if_active(txn, reservation_id, ReservationStatus::Completed).await? {
                    return Err(not_active(&reservation));
                }

                let sale_code = codes::sale_code();
                let sale = sale::ActiveModel {
                    code: Set(sale_code.clone()),
                    origin: Set(SaleOrigin::Reservation),
                    reservation_id: Set(Some(reservation.id)),
                    buyer_id: Set(Some(reservation.owner_id)),
                    operator_id: Set(operator_id),
                    total: Set(reservation.total),
                    payment_method: Set(payment_method),
                    status: Set(SaleStatus::Paid),
                    note: Set(note),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?;

                let description = format!("Sale from reservation {}", reservation.code);
                for line in load_lines(txn, reservation.id).await? {
                    let target = StockRef::from_parts(line.product_id, line.variant_id)?;
                    sale_line::ActiveModel {
                        sale_id: Set(sale.id),
                        product_id: Set(line.product_id),
                        variant_id: Set(line.variant_id),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        subtotal: Set(line.subtotal),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    stock::fulfil_reserved(
                        txn,
                        target,
                        line.quantity,
                        LedgerNote::outflow(operator_id, sale_code.clone(), description.clone()),
                    )
                    .await?;
                }

                Ok(SaleReceipt {
                    sale_id: sale.id,
                    code: sale.code,
                    total: sale.total,
                })
            })
        })
        .await?;

        counter!("ortomediq.reservations.converted", 1);
        info!(reservation_id, sale_code = %receipt.code, "Reservation converted to sale");
        Ok(receipt)
    }

    #[instrument(skip(self), fields(actor_id = actor.user_id))]
    pub async fn get(&self, reservation_id: i32, actor: &AuthUser) -> Result<ReservationDetail, ServiceError> {
        let db = &*self.db;
        let reservation = find_reservation(db, reservation_id).await?;
        ensure_can_see(actor, &reservation)?;
        let lines = load_lines(db, reservation_id).await?;

        Ok(ReservationDetail {
            reservation: reservation.into(),
            lines: lines.into_iter().map(LineView::from).collect(),
        })
    }

    /// Customers only ever see their own reservations. Newest first.
    #[instrument(skip(self), fields(actor_id = actor.user_id))]
    pub async fn list(
        &self,
        actor: &AuthUser,
        query: ReservationQuery,
    ) -> Result<(Vec<ReservationSummary>, u64), ServiceError> {
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

        let db = &*self.db;
        let mut select = ReservationEntity::find();
        if !actor.is_staff() {
            select = select.filter(reservation::Column::OwnerId.eq(actor.user_id));
        }
        if let Some(status) = query.status {
            select = select.filter(reservation::Column::Status.eq(status));
        }

        let paginator = select
            .order_by_desc(reservation::Column::CreatedAt)
            .order_by_desc(reservation::Column::Id)
            .paginate(db, query.per_page);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(query.page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((rows.into_iter().map(ReservationSummary::from).collect(), total))
    }

    /// Only the owner of a completed reservation may review what they bought.
    #[instrument(skip(self), fields(actor_id = actor.user_id))]
    pub async fn authorize_review(
        &self,
        reservation_id: i32,
        actor: &AuthUser,
    ) -> Result<ReviewEligibility, ServiceError> {
        let reservation = find_reservation(&*self.db, reservation_id).await?;
        if reservation.owner_id != actor.user_id {
            return Err(ServiceError::Forbidden(
                "only the owner of a reservation can review it".into(),
            ));
        }
        if reservation.status != ReservationStatus::Completed {
            return Err(ServiceError::InvalidState(format!(
                "Reservation {} is {}, reviews open once it is completed",
                reservation.code, reservation.status
            )));
        }

        Ok(ReviewEligibility {
            reservation_id: reservation.id,
            code: reservation.code,
            eligible: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::user::Role;
    use crate::services::test_support::{
        counters, product_line, seed_product, seed_user, setup_db, test_retry,
    };
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    async fn service() -> (ReservationService, Arc<DatabaseConnection>) {
        let db = Arc::new(setup_db().await);
        let svc = ReservationService::new(db.clone(), test_retry(), Duration::hours(48));
        (svc, db)
    }

    #[tokio::test]
    async fn create_holds_stock_and_prices_lines() {
        let (svc, db) = service().await;
        let customer = seed_user(&db, "Ana", Role::Customer).await;
        let product = seed_product(&db, "Silla de ruedas", dec!(100), 20).await;

        let receipt = svc
            .create(
                &customer,
                NewReservation {
                    lines: vec![product_line(product.id, 5)],
                    note: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(receipt.total, dec!(500));
        assert!(receipt.code.starts_with("APT-"));
        assert!(receipt.expires_at > Utc::now() + Duration::hours(47));
        assert_eq!(counters(&db, StockRef::Product(product.id)).await, (20, 5));
    }

    #[tokio::test]
    async fn duplicate_lines_are_checked_together() {
        let (svc, db) = service().await;
        let customer = seed_user(&db, "Luis", Role::Customer).await;
        let product = seed_product(&db, "Andadera", dec!(700), 10).await;

        let err = svc
            .create(
                &customer,
                NewReservation {
                    lines: vec![product_line(product.id, 6), product_line(product.id, 6)],
                    note: None,
                },
            )
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::InsufficientStock(_));
        assert_eq!(counters(&db, StockRef::Product(product.id)).await, (10, 0));
    }

    #[tokio::test]
    async fn empty_reservation_is_rejected() {
        let (svc, db) = service().await;
        let customer = seed_user(&db, "Eva", Role::Customer).await;
        let err = svc
            .create(&customer, NewReservation { lines: vec![], note: None })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn customers_cannot_touch_foreign_reservations() {
        let (svc, db) = service().await;
        let owner = seed_user(&db, "Ana", Role::Customer).await;
        let stranger = seed_user(&db, "Beto", Role::Customer).await;
        let product = seed_product(&db, "Férula", dec!(80), 4).await;

        let receipt = svc
            .create(&owner, NewReservation { lines: vec![product_line(product.id, 1)], note: None })
            .await
            .unwrap();

        assert_matches!(
            svc.get(receipt.reservation_id, &stranger).await,
            Err(ServiceError::Forbidden(_))
        );
        assert_matches!(
            svc.cancel(receipt.reservation_id, &stranger).await,
            Err(ServiceError::Forbidden(_))
        );
        assert_eq!(counters(&db, StockRef::Product(product.id)).await, (4, 1));
    }

    #[tokio::test]
    async fn customers_cannot_convert() {
        let (svc, db) = service().await;
        let owner = seed_user(&db, "Ana", Role::Customer).await;
        let product = seed_product(&db, "Cojín", dec!(40), 4).await;
        let receipt = svc
            .create(&owner, NewReservation { lines: vec![product_line(product.id, 1)], note: None })
            .await
            .unwrap();

        let err = svc
            .convert_to_sale(receipt.reservation_id, &owner, PaymentMethod::Cash, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Forbidden(_));
    }

    #[tokio::test]
    async fn list_scopes_customers_to_their_own() {
        let (svc, db) = service().await;
        let ana = seed_user(&db, "Ana", Role::Customer).await;
        let beto = seed_user(&db, "Beto", Role::Customer).await;
        let staff = seed_user(&db, "Caja", Role::Employee).await;
        let product = seed_product(&db, "Venda", dec!(10), 50).await;

        for owner in [&ana, &ana, &beto] {
            svc.create(owner, NewReservation { lines: vec![product_line(product.id, 1)], note: None })
                .await
                .unwrap();
        }

        let query = |status| ReservationQuery { status, page: 1, per_page: 20 };
        let (mine, total) = svc.list(&ana, query(None)).await.unwrap();
        assert_eq!((mine.len(), total), (2, 2));
        assert!(mine.iter().all(|r| r.owner_id == ana.user_id));

        let (all, total) = svc.list(&staff, query(Some(ReservationStatus::Active))).await.unwrap();
        assert_eq!((all.len(), total), (3, 3));

        let (none, _) = svc.list(&staff, query(Some(ReservationStatus::Expired))).await.unwrap();
        assert!(none.is_empty());

        assert_matches!(
            svc.list(&staff, ReservationQuery { status: None, page: 0, per_page: 20 }).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn review_requires_completed_reservation_of_the_owner() {
        let (svc, db) = service().await;
        let owner = seed_user(&db, "Ana", Role::Customer).await;
        let staff = seed_user(&db, "Caja", Role::Employee).await;
        let product = seed_product(&db, "Plantilla", dec!(60), 3).await;
        let receipt = svc
            .create(&owner, NewReservation { lines: vec![product_line(product.id, 1)], note: None })
            .await
            .unwrap();

        assert_matches!(
            svc.authorize_review(receipt.reservation_id, &owner).await,
            Err(ServiceError::InvalidState(_))
        );

        svc.convert_to_sale(receipt.reservation_id, &staff, PaymentMethod::Card, None)
            .await
            .unwrap();

        let eligibility = svc.authorize_review(receipt.reservation_id, &owner).await.unwrap();
        assert!(eligibility.eligible);
        assert_matches!(
            svc.authorize_review(receipt.reservation_id, &staff).await,
            Err(ServiceError::Forbidden(_))
        );
        assert_matches!(
            svc.authorize_review(9_999, &owner).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
