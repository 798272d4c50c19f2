mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::TestApp;
use futures::future::join_all;
use ortomediq_api::{
    entities::{reservation::ReservationStatus, sale::PaymentMethod},
    errors::ServiceError,
    services::{
        reservations::NewReservation,
        sales::NewDirectSale,
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_reservations_never_oversell() {
    let app = TestApp::concurrent().await;
    let brace = app.seed_product("Ankle brace", dec!(150), 10).await;

    let attempts = (0..6).map(|_| {
        let svc = Arc::clone(&app.state.services.reservations);
        let owner = app.customer;
        let product_id = brace.id;
        tokio::spawn(async move {
            svc.create(
                &owner,
                NewReservation {
                    lines: vec![product_line(product_id, 6)],
                    note: None,
                },
            )
            .await
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "only one hold of 6 fits in 10 units");
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, ServiceError::InsufficientStock(_)), "{err:?}");
    }
    assert_eq!(app.counters(StockRef::Product(brace.id)).await, (10, 6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn direct_sales_and_reservations_share_available_stock() {
    let app = TestApp::concurrent().await;
    let crutch = app.seed_product("Crutch", dec!(400), 5).await;

    let reservations = app.state.services.reservations.clone();
    let sales = app.state.services.sales.clone();
    let customer = app.customer;
    let employee = app.employee;
    let product_id = crutch.id;

    let reserve = tokio::spawn(async move {
        reservations
            .create(
                &customer,
                NewReservation {
                    lines: vec![product_line(product_id, 3)],
                    note: None,
                },
            )
            .await
            .is_ok()
    });
    let sell = tokio::spawn(async move {
        sales
            .create_direct(
                &employee,
                NewDirectSale {
                    buyer_id: None,
                    lines: vec![product_line(product_id, 3)],
                    payment_method: PaymentMethod::Cash,
                    note: None,
                },
            )
            .await
            .is_ok()
    });

    let reserved_ok = reserve.await.unwrap();
    let sold_ok = sell.await.unwrap();
    assert!(reserved_ok ^ sold_ok, "3 + 3 cannot both fit in 5");

    let (on_hand, reserved) = app.counters(StockRef::Product(crutch.id)).await;
    if reserved_ok {
        assert_eq!((on_hand, reserved), (5, 3));
    } else {
        assert_eq!((on_hand, reserved), (2, 0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_convert_race_has_a_single_winner() {
    let app = TestApp::concurrent().await;
    let walker = app.seed_product("Walker", dec!(900), 10).await;
    let receipt = app
        .state
        .services
        .reservations
        .create(
            &app.customer,
            NewReservation {
                lines: vec![product_line(walker.id, 4)],
                note: None,
            },
        )
        .await
        .unwrap();
    let id = receipt.reservation_id;

    let canceller = app.state.services.reservations.clone();
    let converter = app.state.services.reservations.clone();
    let customer = app.customer;
    let employee = app.employee;

    let cancel = tokio::spawn(async move { canceller.cancel(id, &customer).await });
    let convert = tokio::spawn(async move {
        converter
            .convert_to_sale(id, &employee, PaymentMethod::Cash, None)
            .await
    });

    let cancel = cancel.await.unwrap();
    let convert = convert.await.unwrap();
    let canceled = cancel.is_ok();
    let converted = convert.is_ok();
    assert!(canceled ^ converted);
    let loser = cancel.err().or(convert.err()).expect("one side loses");
    assert!(matches!(loser, ServiceError::InvalidState(_)), "{loser:?}");

    let detail = app.state.services.reservations.get(id, &app.customer).await.unwrap();
    let counters = app.counters(StockRef::Product(walker.id)).await;
    if canceled {
        assert_eq!(detail.reservation.status, ReservationStatus::Canceled);
        assert_eq!(counters, (10, 0));
    } else {
        assert_eq!(detail.reservation.status, ReservationStatus::Completed);
        assert_eq!(counters, (6, 0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_single_unit_holds_fill_stock_exactly() {
    let app = TestApp::concurrent().await;
    let gauze = app.seed_product("Gauze roll", dec!(20), 10).await;

    let attempts = (0..24).map(|i| {
        let svc = Arc::clone(&app.state.services.reservations);
        let owner = if i % 2 == 0 { app.customer } else { app.other_customer };
        let product_id = gauze.id;
        tokio::spawn(async move {
            svc.create(
                &owner,
                NewReservation {
                    lines: vec![product_line(product_id, 1)],
                    note: None,
                },
            )
            .await
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 10);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, ServiceError::InsufficientStock(_)), "{err:?}");
    }
    assert_eq!(app.counters(StockRef::Product(gauze.id)).await, (10, 10));
}

#[tokio::test]
async fn overdue_reservations_expire_exactly_once() {
    let app = TestApp::new().await;
    let svc = app.state.services.reservations.clone();
    let expiration = app.state.services.expiration.clone();
    let pillow = app.seed_product("Orthopedic pillow", dec!(550), 7).await;
    let target = StockRef::Product(pillow.id);

    let receipt = svc
        .create(
            &app.customer,
            NewReservation {
                lines: vec![product_line(pillow.id, 3)],
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(app.counters(target).await, (7, 3));

    // Nothing is overdue yet
    assert_eq!(expiration.sweep().await.unwrap(), 0);
    assert_eq!(app.counters(target).await, (7, 3));

    let later = Utc::now() + Duration::hours(49);
    assert_eq!(expiration.sweep_at(later).await.unwrap(), 1);
    assert_eq!(app.counters(target).await, (7, 0));
    assert_eq!(expiration.sweep_at(later).await.unwrap(), 0);
    assert_eq!(app.counters(target).await, (7, 0));

    let detail = svc.get(receipt.reservation_id, &app.customer).await.unwrap();
    assert_eq!(detail.reservation.status, ReservationStatus::Expired);

    let err = svc
        .cancel(receipt.reservation_id, &app.customer)
        .await
        .expect_err("expired reservations are closed");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    let err = svc
        .convert_to_sale(receipt.reservation_id, &app.employee, PaymentMethod::Cash, None)
        .await
        .expect_err("expired reservations cannot be sold");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(app.counters(target).await, (7, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_release_each_reservation_once() {
    let app = TestApp::concurrent().await;
    let svc = app.state.services.reservations.clone();
    let belt = app.seed_product("Lumbar belt", dec!(480), 12).await;

    for _ in 0..3 {
        svc.create(
            &app.customer,
            NewReservation {
                lines: vec![product_line(belt.id, 2)],
                note: None,
            },
        )
        .await
        .unwrap();
    }
    assert_eq!(app.counters(StockRef::Product(belt.id)).await, (12, 6));

    let later = Utc::now() + Duration::hours(72);
    let sweeps = (0..3).map(|_| {
        let expiration = app.state.services.expiration.clone();
        tokio::spawn(async move { expiration.sweep_at(later).await })
    });
    let expired: u64 = join_all(sweeps)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("sweep"))
        .sum();

    assert_eq!(expired, 3);
    assert_eq!(app.counters(StockRef::Product(belt.id)).await, (12, 0));
}
