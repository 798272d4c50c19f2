mod common;

use assert_matches::assert_matches;
use common::TestApp;
use ortomediq_api::{
    entities::{reservation::ReservationStatus, sale::PaymentMethod},
    errors::ServiceError,
    services::{
        ledger::MovementFilter,
        reservations::{NewReservation, ReservationQuery},
        stock::{LineRequest, StockRef},
    },
};
use rust_decimal_macros::dec;

fn product_line(product_id: i32, quantity: i32) -> LineRequest {
    LineRequest {
        product_id: Some(product_id),
        variant_id: None,
        quantity,
    }
}

fn reservation_of(lines: Vec<LineRequest>) -> NewReservation {
    NewReservation { lines, note: None }
}

#[tokio::test]
async fn reserve_reject_cancel_and_refuse_conversion() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let brace = app.seed_product("Knee brace", dec!(100), 20).await;
    let target = StockRef::Product(brace.id);

    let receipt = svc
        .create(&app.customer, reservation_of(vec![product_line(brace.id, 5)]))
        .await
        .expect("reserve 5 of 20");
    assert_eq!(receipt.total, dec!(500));
    assert!(receipt.code.starts_with("APT-"));
    assert_eq!(app.counters(target).await, (20, 5));

    let err = svc
        .create(&app.customer, reservation_of(vec![product_line(brace.id, 16)]))
        .await
        .expect_err("only 15 remain available");
    assert_matches!(err, ServiceError::InsufficientStock(ref msg) if msg.contains("15 available, 16 requested"));
    assert_eq!(app.counters(target).await, (20, 5));

    svc.cancel(receipt.reservation_id, &app.customer)
        .await
        .expect("owner cancels");
    assert_eq!(app.counters(target).await, (20, 0));

    let err = svc
        .convert_to_sale(receipt.reservation_id, &app.employee, PaymentMethod::Cash, None)
        .await
        .expect_err("canceled reservations cannot be sold");
    assert_matches!(err, ServiceError::InvalidState(_));
    assert_eq!(app.counters(target).await, (20, 0));
}

#[tokio::test]
async fn second_cancel_is_rejected_without_releasing_again() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let cane = app.seed_product("Cane", dec!(250), 8).await;
    let target = StockRef::Product(cane.id);

    let first = svc
        .create(&app.customer, reservation_of(vec![product_line(cane.id, 3)]))
        .await
        .unwrap();
    svc.create(&app.other_customer, reservation_of(vec![product_line(cane.id, 2)]))
        .await
        .unwrap();
    assert_eq!(app.counters(target).await, (8, 5));

    svc.cancel(first.reservation_id, &app.customer).await.unwrap();
    let err = svc
        .cancel(first.reservation_id, &app.customer)
        .await
        .expect_err("already canceled");
    assert_matches!(err, ServiceError::InvalidState(_));

    // The other customer's hold is untouched
    assert_eq!(app.counters(target).await, (8, 2));
}

#[tokio::test]
async fn staff_may_cancel_any_reservation_but_customers_only_their_own() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let splint = app.seed_product("Wrist splint", dec!(180), 6).await;

    let receipt = svc
        .create(&app.customer, reservation_of(vec![product_line(splint.id, 2)]))
        .await
        .unwrap();

    let err = svc
        .cancel(receipt.reservation_id, &app.other_customer)
        .await
        .expect_err("foreign reservation");
    assert_matches!(err, ServiceError::Forbidden(_));

    svc.cancel(receipt.reservation_id, &app.employee)
        .await
        .expect("staff cancels on behalf of the customer");
    assert_eq!(app.counters(StockRef::Product(splint.id)).await, (6, 0));
}

#[tokio::test]
async fn conversion_consumes_reserved_units_and_writes_the_ledger() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let walker = app.seed_product("Walker", dec!(1200), 10).await;
    let target = StockRef::Product(walker.id);

    let receipt = svc
        .create(&app.customer, reservation_of(vec![product_line(walker.id, 4)]))
        .await
        .unwrap();
    assert_eq!(app.counters(target).await, (10, 4));

    let sale = svc
        .convert_to_sale(receipt.reservation_id, &app.employee, PaymentMethod::Card, None)
        .await
        .expect("staff converts");
    assert!(sale.code.starts_with("VTA-"));
    assert_eq!(sale.total, dec!(4800));
    assert_eq!(app.counters(target).await, (6, 0));

    let movements = app
        .state
        .services
        .inventory
        .movements(&MovementFilter {
            product_id: Some(walker.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].delta, -4);
    assert_eq!(movements[0].actor_id, app.employee.user_id);
    assert_eq!(movements[0].reference.as_deref(), Some(sale.code.as_str()));

    let detail = svc.get(receipt.reservation_id, &app.customer).await.unwrap();
    assert_eq!(detail.reservation.status, ReservationStatus::Completed);

    let detail = app.state.services.sales.get(sale.sale_id).await.unwrap();
    assert_eq!(detail.sale.reservation_id, Some(receipt.reservation_id));
    assert_eq!(detail.sale.buyer_id, Some(app.customer.user_id));
    assert_eq!(detail.lines.len(), 1);

    let err = svc
        .convert_to_sale(receipt.reservation_id, &app.employee, PaymentMethod::Card, None)
        .await
        .expect_err("a reservation is sold once");
    assert_matches!(err, ServiceError::InvalidState(_));
    assert_eq!(app.counters(target).await, (6, 0));
}

#[tokio::test]
async fn failing_line_rolls_back_the_whole_reservation() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let collar = app.seed_product("Cervical collar", dec!(90), 5).await;
    let sling = app.seed_product("Arm sling", dec!(60), 1).await;

    let err = svc
        .create(
            &app.customer,
            reservation_of(vec![product_line(collar.id, 2), product_line(sling.id, 3)]),
        )
        .await
        .expect_err("sling is short");
    assert_matches!(err, ServiceError::InsufficientStock(_));

    assert_eq!(app.counters(StockRef::Product(collar.id)).await, (5, 0));
    assert_eq!(app.counters(StockRef::Product(sling.id)).await, (1, 0));

    let (items, total) = svc
        .list(
            &app.customer,
            ReservationQuery {
                status: None,
                page: 1,
                per_page: 20,
            },
        )
        .await
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn sized_products_reserve_against_their_variants() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let stocking = app.seed_sizeable_product("Compression stocking", dec!(300)).await;
    let medium = app.seed_variant(stocking.id, "M", dec!(320), 4).await;

    let err = svc
        .create(&app.customer, reservation_of(vec![product_line(stocking.id, 1)]))
        .await
        .expect_err("size must be chosen");
    assert_matches!(err, ServiceError::VariantRequired(_));

    let receipt = svc
        .create(
            &app.customer,
            reservation_of(vec![LineRequest {
                product_id: Some(stocking.id),
                variant_id: Some(medium.id),
                quantity: 2,
            }]),
        )
        .await
        .expect("variant line");
    assert_eq!(receipt.total, dec!(640));
    assert_eq!(app.counters(StockRef::Variant(medium.id)).await, (4, 2));
    assert_eq!(app.counters(StockRef::Product(stocking.id)).await, (0, 0));
}

#[tokio::test]
async fn review_is_allowed_only_after_completion() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let insole = app.seed_product("Insole", dec!(75), 10).await;

    let receipt = svc
        .create(&app.customer, reservation_of(vec![product_line(insole.id, 1)]))
        .await
        .unwrap();

    let err = svc
        .authorize_review(receipt.reservation_id, &app.customer)
        .await
        .expect_err("still active");
    assert_matches!(err, ServiceError::InvalidState(_));

    svc.convert_to_sale(receipt.reservation_id, &app.admin, PaymentMethod::Transfer, None)
        .await
        .unwrap();

    let eligibility = svc
        .authorize_review(receipt.reservation_id, &app.customer)
        .await
        .expect("owner may review");
    assert!(eligibility.eligible);
    assert_eq!(eligibility.code, receipt.code);

    let err = svc
        .authorize_review(receipt.reservation_id, &app.other_customer)
        .await
        .expect_err("not the owner");
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn disabled_products_cannot_be_reserved() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let insoles = app.seed_product("Insoles", dec!(320), 8).await;
    let target = StockRef::Product(insoles.id);
    app.disable(target).await;

    let err = svc
        .create(&app.customer, reservation_of(vec![product_line(insoles.id, 2)]))
        .await
        .expect_err("disabled products are not for sale");
    assert_matches!(err, ServiceError::Disabled(_));
    assert_eq!(app.counters(target).await, (8, 0));

    let (mine, total) = svc
        .list(
            &app.customer,
            ReservationQuery {
                status: None,
                page: 1,
                per_page: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 0);
    assert!(mine.is_empty());
}
