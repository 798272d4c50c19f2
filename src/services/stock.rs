//! Stock counters for products and variants.
//!
//! Both kinds of stockable row carry the same `on_hand` / `reserved` pair, so
//! every mutation goes through one generic compare-and-set update over the
//! [`StockTable`] trait. The update's `WHERE` clause re-checks the counter
//! invariants (`0 <= reserved <= on_hand`), which keeps them intact even on
//! stores without row locks; on Postgres the row is additionally locked with
//! `SELECT ... FOR UPDATE` by [`lock`] before any availability decision.

use std::fmt;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::entities::stock_movement::MovementKind;
use crate::entities::{product, product_variant};
use crate::errors::ServiceError;
use crate::services::ledger::{self, NewMovement};

/// Reference to exactly one stockable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockRef {
    Product(i32),
    Variant(i32),
}

impl StockRef {
    /// Builds a reference from nullable id columns, requiring exactly one.
    pub fn from_parts(product_id: Option<i32>, variant_id: Option<i32>) -> Result<Self, ServiceError> {
        match (product_id, variant_id) {
            (Some(id), None) => Ok(StockRef::Product(id)),
            (None, Some(id)) => Ok(StockRef::Variant(id)),
            (Some(_), Some(_)) => Err(ServiceError::ValidationError(
                "stock reference must name a product or a variant, not both".into(),
            )),
            (None, None) => Err(ServiceError::ValidationError(
                "stock reference must name a product or a variant".into(),
            )),
        }
    }

    pub fn product_id(&self) -> Option<i32> {
        match self {
            StockRef::Product(id) => Some(*id),
            StockRef::Variant(_) => None,
        }
    }

    pub fn variant_id(&self) -> Option<i32> {
        match self {
            StockRef::Variant(id) => Some(*id),
            StockRef::Product(_) => None,
        }
    }
}

impl fmt::Display for StockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockRef::Product(id) => write!(f, "product {}", id),
            StockRef::Variant(id) => write!(f, "variant {}", id),
        }
    }
}

/// Point-in-time view of a stockable row, read under lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockSnapshot {
    pub target: StockRef,
    /// Owning product (the product itself for plain products)
    pub product_id: i32,
    pub on_hand: i32,
    pub reserved: i32,
    pub unit_price: Decimal,
    pub is_enabled: bool,
    pub requires_variant: bool,
}

impl StockSnapshot {
    pub fn available(&self) -> i32 {
        self.on_hand - self.reserved
    }
}

/// A table holding `on_hand` / `reserved` counters.
pub trait StockTable: EntityTrait {
    fn id_column() -> Self::Column;
    fn on_hand_column() -> Self::Column;
    fn reserved_column() -> Self::Column;
    fn updated_at_column() -> Self::Column;
    fn snapshot(model: Self::Model) -> StockSnapshot;
}

impl StockTable for product::Entity {
    fn id_column() -> Self::Column {
        product::Column::Id
    }
    fn on_hand_column() -> Self::Column {
        product::Column::OnHand
    }
    fn reserved_column() -> Self::Column {
        product::Column::Reserved
    }
    fn updated_at_column() -> Self::Column {
        product::Column::UpdatedAt
    }
    fn snapshot(model: product::Model) -> StockSnapshot {
        StockSnapshot {
            target: StockRef::Product(model.id),
            product_id: model.id,
            on_hand: model.on_hand,
            reserved: model.reserved,
            unit_price: model.default_price,
            is_enabled: model.is_enabled,
            requires_variant: model.requires_variant,
        }
    }
}

impl StockTable for product_variant::Entity {
    fn id_column() -> Self::Column {
        product_variant::Column::Id
    }
    fn on_hand_column() -> Self::Column {
        product_variant::Column::OnHand
    }
    fn reserved_column() -> Self::Column {
        product_variant::Column::Reserved
    }
    fn updated_at_column() -> Self::Column {
        product_variant::Column::UpdatedAt
    }
    fn snapshot(model: product_variant::Model) -> StockSnapshot {
        StockSnapshot {
            target: StockRef::Variant(model.id),
            product_id: model.product_id,
            on_hand: model.on_hand,
            reserved: model.reserved,
            unit_price: model.price,
            is_enabled: model.is_enabled,
            requires_variant: false,
        }
    }
}

async fn lock_row<T, C>(conn: &C, id: i32) -> Result<Option<StockSnapshot>, ServiceError>
where
    T: StockTable,
    C: ConnectionTrait,
{
    let model = T::find()
        .filter(T::id_column().eq(id))
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(model.map(T::snapshot))
}

/// Reads `target` with a row lock held until the surrounding transaction ends.
pub async fn lock<C: ConnectionTrait>(conn: &C, target: StockRef) -> Result<StockSnapshot, ServiceError> {
    let snapshot = match target {
        StockRef::Product(id) => lock_row::<product::Entity, C>(conn, id).await?,
        StockRef::Variant(id) => lock_row::<product_variant::Entity, C>(conn, id).await?,
    };
    snapshot.ok_or_else(|| ServiceError::NotFound(format!("{} not found", target)))
}

/// Applies both deltas in a single guarded UPDATE. Returns `false` when the
/// guards rejected the change (the row is left untouched).
async fn shift_row<T, C>(conn: &C, id: i32, on_hand_delta: i32, reserved_delta: i32) -> Result<bool, ServiceError>
where
    T: StockTable,
    C: ConnectionTrait,
{
    let on_hand = T::on_hand_column();
    let reserved = T::reserved_column();

    let out_of_range = || {
        ServiceError::ValidationError(format!(
            "stock change ({:+} on hand, {:+} reserved) is out of range",
            on_hand_delta, reserved_delta
        ))
    };
    let min_on_hand = on_hand_delta.checked_neg().ok_or_else(out_of_range)?;
    let min_reserved = reserved_delta.checked_neg().ok_or_else(out_of_range)?;
    let min_available = reserved_delta
        .checked_sub(on_hand_delta)
        .ok_or_else(out_of_range)?;

    let mut update = T::update_many()
        .col_expr(on_hand, Expr::col(on_hand).add(on_hand_delta))
        .col_expr(reserved, Expr::col(reserved).add(reserved_delta))
        .col_expr(T::updated_at_column(), Expr::value(Utc::now()))
        .filter(T::id_column().eq(id))
        .filter(Expr::col(on_hand).gte(min_on_hand))
        .filter(Expr::col(reserved).gte(min_reserved))
        .filter(Expr::expr(Expr::col(on_hand).sub(Expr::col(reserved))).gte(min_available));
    // Counters are INTEGER columns; never let them grow past i32::MAX
    if on_hand_delta > 0 {
        update = update.filter(Expr::col(on_hand).lte(i32::MAX - on_hand_delta));
    }
    if reserved_delta > 0 {
        update = update.filter(Expr::col(reserved).lte(i32::MAX - reserved_delta));
    }

    let result = update.exec(conn).await.map_err(ServiceError::db_error)?;

    Ok(result.rows_affected == 1)
}

async fn shift<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    on_hand_delta: i32,
    reserved_delta: i32,
) -> Result<bool, ServiceError> {
    match target {
        StockRef::Product(id) => {
            shift_row::<product::Entity, C>(conn, id, on_hand_delta, reserved_delta).await
        }
        StockRef::Variant(id) => {
            shift_row::<product_variant::Entity, C>(conn, id, on_hand_delta, reserved_delta).await
        }
    }
}

/// Builds the error for a rejected shift from the row's current counters.
async fn rejected<C: ConnectionTrait>(conn: &C, target: StockRef, requested: i32) -> ServiceError {
    match lock(conn, target).await {
        Ok(snapshot) => ServiceError::insufficient_stock(target, snapshot.available(), requested),
        Err(err) => err,
    }
}

/// Ledger details accompanying an on-hand change.
#[derive(Debug, Clone)]
pub struct LedgerNote {
    pub actor_id: i32,
    pub kind: MovementKind,
    pub reference: Option<String>,
    pub description: Option<String>,
}

impl LedgerNote {
    pub fn outflow(actor_id: i32, reference: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            actor_id,
            kind: MovementKind::Outflow,
            reference: Some(reference.into()),
            description: Some(description.into()),
        }
    }
}

async fn record_change<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    delta: i32,
    note: LedgerNote,
) -> Result<i32, ServiceError> {
    ledger::record(
        conn,
        NewMovement {
            target,
            actor_id: note.actor_id,
            delta,
            kind: note.kind,
            reference: note.reference,
            description: note.description,
        },
    )
    .await
}

/// Holds `quantity` units for a reservation: `reserved += quantity`.
/// Not ledgered; on-hand is unchanged.
pub async fn reserve<C: ConnectionTrait>(conn: &C, target: StockRef, quantity: i32) -> Result<(), ServiceError> {
    if shift(conn, target, 0, quantity).await? {
        Ok(())
    } else {
        Err(rejected(conn, target, quantity).await)
    }
}

/// Returns reserved units to the available pool: `reserved -= quantity`.
pub async fn release<C: ConnectionTrait>(conn: &C, target: StockRef, quantity: i32) -> Result<(), ServiceError> {
    if shift(conn, target, 0, -quantity).await? {
        Ok(())
    } else {
        error!(%target, quantity, "reserved counter would drop below zero");
        Err(ServiceError::InternalError(format!(
            "cannot release {} units of {}: reserved counter too low",
            quantity, target
        )))
    }
}

/// Sells units that were held by a reservation: both counters drop by
/// `quantity` and one outflow entry is appended.
pub async fn fulfil_reserved<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    quantity: i32,
    note: LedgerNote,
) -> Result<(), ServiceError> {
    if !shift(conn, target, -quantity, -quantity).await? {
        error!(%target, quantity, "reserved units missing at conversion");
        return Err(ServiceError::InternalError(format!(
            "cannot fulfil {} reserved units of {}",
            quantity, target
        )));
    }
    record_change(conn, target, -quantity, note).await?;
    Ok(())
}

/// Removes unreserved units from stock (walk-in sale) and ledgers it.
pub async fn withdraw<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    quantity: i32,
    note: LedgerNote,
) -> Result<(), ServiceError> {
    if !shift(conn, target, -quantity, 0).await? {
        return Err(rejected(conn, target, quantity).await);
    }
    record_change(conn, target, -quantity, note).await?;
    Ok(())
}

/// Outcome of a manual adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AdjustmentOutcome {
    pub target: StockRef,
    pub previous_on_hand: i32,
    pub new_on_hand: i32,
    pub movement_id: i32,
}

/// Applies a signed on-hand correction. The result may not drop below the
/// units currently reserved.
pub async fn adjust<C: ConnectionTrait>(
    conn: &C,
    target: StockRef,
    delta: i32,
    note: LedgerNote,
) -> Result<AdjustmentOutcome, ServiceError> {
    let before = lock(conn, target).await?;
    if before.requires_variant {
        return Err(ServiceError::VariantRequired(format!(
            "{} keeps its stock on variants; adjust a variant instead",
            target
        )));
    }
    let new_on_hand = before.on_hand.checked_add(delta).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "adjusting {} by {:+} overflows its on-hand counter ({})",
            target, delta, before.on_hand
        ))
    })?;
    if new_on_hand < before.reserved {
        return Err(ServiceError::insufficient_stock(
            target,
            before.available(),
            delta.saturating_neg(),
        ));
    }
    if !shift(conn, target, delta, 0).await? {
        let current = lock(conn, target).await?;
        return Err(ServiceError::insufficient_stock(
            target,
            current.available(),
            delta.saturating_neg(),
        ));
    }
    let movement_id = record_change(conn, target, delta, note).await?;
    Ok(AdjustmentOutcome {
        target,
        previous_on_hand: before.on_hand,
        new_on_hand,
        movement_id,
    })
}

/// One requested item, as received from a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRequest {
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    pub quantity: i32,
}

/// A validated, priced line ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub target: StockRef,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Resolves, locks and prices one requested line, checking it against the
/// row's current availability.
pub async fn price_line<C: ConnectionTrait>(conn: &C, request: LineRequest) -> Result<PricedLine, ServiceError> {
    if request.quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be positive, got {}",
            request.quantity
        )));
    }

    let target = match (request.variant_id, request.product_id) {
        (Some(variant_id), _) => StockRef::Variant(variant_id),
        (None, Some(product_id)) => StockRef::Product(product_id),
        (None, None) => {
            return Err(ServiceError::ValidationError(
                "each line needs a product_id or variant_id".into(),
            ))
        }
    };

    let snapshot = lock(conn, target).await?;

    if let (StockRef::Variant(_), Some(product_id)) = (target, request.product_id) {
        if snapshot.product_id != product_id {
            return Err(ServiceError::ValidationError(format!(
                "{} does not belong to product {}",
                target, product_id
            )));
        }
    }
    if !snapshot.is_enabled {
        return Err(ServiceError::Disabled(format!("{} is disabled", target)));
    }
    if snapshot.requires_variant {
        return Err(ServiceError::VariantRequired(format!(
            "{} is sold by size; choose a variant",
            target
        )));
    }
    if request.quantity > snapshot.available() {
        return Err(ServiceError::insufficient_stock(
            target,
            snapshot.available(),
            request.quantity,
        ));
    }

    Ok(PricedLine {
        target,
        quantity: request.quantity,
        unit_price: snapshot.unit_price,
        subtotal: snapshot.unit_price * Decimal::from(request.quantity),
    })
}

/// Current counters of a stockable row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Availability {
    pub target: StockRef,
    pub on_hand: i32,
    pub reserved: i32,
    pub available: i32,
}

/// Reads counters without locking.
pub async fn availability<C: ConnectionTrait>(conn: &C, target: StockRef) -> Result<Availability, ServiceError> {
    let snapshot = match target {
        StockRef::Product(id) => product::Entity::find_by_id(id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(product::Entity::snapshot),
        StockRef::Variant(id) => product_variant::Entity::find_by_id(id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(product_variant::Entity::snapshot),
    }
    .ok_or_else(|| ServiceError::NotFound(format!("{} not found", target)))?;

    Ok(Availability {
        target,
        on_hand: snapshot.on_hand,
        reserved: snapshot.reserved,
        available: snapshot.available(),
    })
}
