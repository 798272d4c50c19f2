use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::auth::AuthUser;
use crate::entities::user::Role;
use crate::entities::{product, product_variant, user};
use crate::middleware_helpers::retry::RetryConfig;
use crate::services::stock::{self, LineRequest, StockRef};

/// Fresh in-memory database with the schema applied. A single pooled
/// connection keeps every query on the same in-memory file.
pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect in-memory sqlite");
    crate::db::run_migrations(&db).await.expect("run migrations");
    db
}

pub fn test_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
    }
}

pub async fn seed_user(db: &DatabaseConnection, name: &str, role: Role) -> AuthUser {
    let email = format!("{}.{}@ortomediq.test", name.to_lowercase(), uuid::Uuid::new_v4().simple());
    let user = user::ActiveModel {
        name: Set(name.to_string()),
        email: Set(email),
        role: Set(role),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert user");
    AuthUser { user_id: user.id, role: user.role }
}

pub async fn seed_product(db: &DatabaseConnection, name: &str, price: Decimal, on_hand: i32) -> product::Model {
    product::ActiveModel {
        name: Set(name.to_string()),
        default_price: Set(price),
        requires_variant: Set(false),
        is_enabled: Set(true),
        on_hand: Set(on_hand),
        reserved: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert product")
}

pub async fn seed_variant(
    db: &DatabaseConnection,
    product_id: i32,
    label: &str,
    price: Decimal,
    on_hand: i32,
) -> product_variant::Model {
    product_variant::ActiveModel {
        product_id: Set(product_id),
        label: Set(label.to_string()),
        sku: Set(None),
        price: Set(price),
        is_enabled: Set(true),
        on_hand: Set(on_hand),
        reserved: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert variant")
}

pub fn product_line(product_id: i32, quantity: i32) -> LineRequest {
    LineRequest { product_id: Some(product_id), variant_id: None, quantity }
}

/// `(on_hand, reserved)` of a stockable row.
pub async fn counters(db: &DatabaseConnection, target: StockRef) -> (i32, i32) {
    let snapshot = stock::availability(db, target).await.expect("read counters");
    (snapshot.on_hand, snapshot.reserved)
}
