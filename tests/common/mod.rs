#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use ortomediq_api::{
    auth::AuthUser,
    config::AppConfig,
    db,
    entities::{
        product, product_variant, session,
        user::{self, Role},
    },
    services::stock::{self, StockRef},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, IntoActiveModel, Set};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Application harness backed by a throwaway SQLite file.
///
/// Seeds one user per role plus an inactive customer, each with a live
/// session token, and one already-expired session for the customer.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub admin: AuthUser,
    pub employee: AuthUser,
    pub customer: AuthUser,
    pub other_customer: AuthUser,
    pub admin_token: String,
    pub employee_token: String,
    pub customer_token: String,
    pub other_customer_token: String,
    pub inactive_token: String,
    pub expired_token: String,
    _db_dir: TempDir,
}

impl TestApp {
    /// Single-connection harness: every transaction runs alone.
    pub async fn new() -> Self {
        Self::with_pool(1).await
    }

    /// Harness whose pool runs several transactions at once against the same
    /// file. The database is switched to WAL and writers that collide go
    /// through the transient-storage retry path.
    pub async fn concurrent() -> Self {
        Self::with_pool(8).await
    }

    async fn with_pool(max_connections: u32) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir");
        let db_path = db_dir.path().join("ortomediq_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = max_connections;
        cfg.db_min_connections = 1;
        cfg.transaction_retry_base_delay_ms = 1;
        if max_connections > 1 {
            cfg.transaction_max_attempts = 20;
        }

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        if max_connections > 1 {
            pool.execute_unprepared("PRAGMA journal_mode=WAL")
                .await
                .expect("switch test database to WAL");
        }
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg);
        let router = ortomediq_api::app_router(state.clone());

        let admin = seed_user(&state, "Admin", Role::Admin, true).await;
        let employee = seed_user(&state, "Employee", Role::Employee, true).await;
        let customer = seed_user(&state, "Customer", Role::Customer, true).await;
        let other_customer = seed_user(&state, "Other", Role::Customer, true).await;
        let inactive = seed_user(&state, "Inactive", Role::Customer, false).await;

        let ttl = Duration::hours(1);
        let admin_token = issue(&state, admin.user_id, ttl).await;
        let employee_token = issue(&state, employee.user_id, ttl).await;
        let customer_token = issue(&state, customer.user_id, ttl).await;
        let other_customer_token = issue(&state, other_customer.user_id, ttl).await;
        let inactive_token = issue(&state, inactive.user_id, ttl).await;

        let expired_token = "expired-session-token".to_string();
        session::ActiveModel {
            token: Set(expired_token.clone()),
            user_id: Set(customer.user_id),
            expires_at: Set(Utc::now() - Duration::minutes(5)),
            created_at: Set(Utc::now() - Duration::hours(2)),
        }
        .insert(&*state.db)
        .await
        .expect("insert expired session");

        Self {
            router,
            state,
            admin,
            employee,
            customer,
            other_customer,
            admin_token,
            employee_token,
            customer_token,
            other_customer_token,
            inactive_token,
            expired_token,
            _db_dir: db_dir,
        }
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Like [`TestApp::request`] but returns the status and decoded JSON body.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is JSON")
        };
        (status, value)
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, on_hand: i32) -> product::Model {
        product::ActiveModel {
            name: Set(name.to_string()),
            default_price: Set(price),
            requires_variant: Set(false),
            is_enabled: Set(true),
            on_hand: Set(on_hand),
            reserved: Set(0),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Product sold by size; stock lives on its variants.
    pub async fn seed_sizeable_product(&self, name: &str, price: Decimal) -> product::Model {
        product::ActiveModel {
            name: Set(name.to_string()),
            default_price: Set(price),
            requires_variant: Set(true),
            is_enabled: Set(true),
            on_hand: Set(0),
            reserved: Set(0),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed sizeable product")
    }

    pub async fn seed_variant(
        &self,
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
        .insert(&*self.state.db)
        .await
        .expect("seed variant")
    }

    /// Marks a product or variant as no longer for sale.
    pub async fn disable(&self, target: StockRef) {
        let db = &*self.state.db;
        match target {
            StockRef::Product(id) => {
                let mut row = product::Entity::find_by_id(id)
                    .one(db)
                    .await
                    .expect("load product")
                    .expect("product exists")
                    .into_active_model();
                row.is_enabled = Set(false);
                row.update(db).await.expect("disable product");
            }
            StockRef::Variant(id) => {
                let mut row = product_variant::Entity::find_by_id(id)
                    .one(db)
                    .await
                    .expect("load variant")
                    .expect("variant exists")
                    .into_active_model();
                row.is_enabled = Set(false);
                row.update(db).await.expect("disable variant");
            }
        }
    }

    /// `(on_hand, reserved)` of a stockable row.
    pub async fn counters(&self, target: StockRef) -> (i32, i32) {
        let snapshot = stock::availability(&*self.state.db, target)
            .await
            .expect("read counters");
        (snapshot.on_hand, snapshot.reserved)
    }
}

async fn seed_user(state: &AppState, name: &str, role: Role, active: bool) -> AuthUser {
    let user = user::ActiveModel {
        name: Set(name.to_string()),
        email: Set(format!("{}@ortomediq.test", name.to_lowercase())),
        role: Set(role),
        is_active: Set(active),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&*state.db)
    .await
    .expect("seed user");
    AuthUser {
        user_id: user.id,
        role: user.role,
    }
}

async fn issue(state: &AppState, user_id: i32, ttl: Duration) -> String {
    state
        .auth
        .issue(user_id, ttl)
        .await
        .expect("issue session token")
}
