use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementKind {
    #[sea_orm(string_value = "inflow")]
    Inflow,
    #[sea_orm(string_value = "outflow")]
    Outflow,
    /// Goods going back out to a supplier
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
}

impl MovementKind {
    /// Signed on-hand delta for a manually entered quantity.
    ///
    /// Outflows and returns always subtract, inflows always add, adjustments
    /// keep the sign the operator entered. `None` when `|quantity|` does not
    /// fit in an `i32`.
    pub fn signed_delta(self, quantity: i32) -> Option<i32> {
        match self {
            MovementKind::Outflow | MovementKind::Return => quantity.checked_abs().map(|q| -q),
            MovementKind::Inflow => quantity.checked_abs(),
            MovementKind::Adjustment => Some(quantity),
        }
    }
}

/// Immutable ledger row documenting one on-hand change.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: Option<i32>,
    pub variant_id: Option<i32>,
    pub actor_id: i32,
    pub delta: i32,
    pub kind: MovementKind,
    pub reference: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
