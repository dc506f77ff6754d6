//! Webhook reconciliation integration tests for checkout-service.

mod common;

use common::{refund_event, session_event, session_event_at, TestApp};
use uuid::Uuid;

/// Create a pending order whose checkout session is `session_id`.
async fn pending_order(app: &TestApp, session_id: &str, interval: &str) -> (Uuid, Uuid) {
    let slug = format!("p-{}", Uuid::new_v4().simple());
    let product_id = app.seed_product(&slug, 1999, interval, true).await;
    app.mount_checkout_success(session_id).await;

    let response = app
        .create_order(serde_json::json!({ "product_id": product_id }))
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let order_id = Uuid::parse_str(body["order_id"].as_str().unwrap()).unwrap();

    (order_id, product_id)
}

#[tokio::test]
async fn missing_signature_is_rejected_without_touching_orders() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_sig_1", "monthly").await;
    let before = app.fetch_order(order_id).await;

    let response = app
        .client
        .post(format!("{}/webhooks/stripe", app.address))
        .header("content-type", "application/json")
        .body(session_event("checkout.session.completed", "cs_sig_1", Some("pi_1")).to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Missing signature");

    assert_eq!(app.fetch_order(order_id).await, before);

    app.cleanup().await;
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_touching_orders() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_sig_2", "monthly").await;
    let before = app.fetch_order(order_id).await;

    let payload = session_event("checkout.session.completed", "cs_sig_2", Some("pi_1"));
    let ts = chrono::Utc::now().timestamp();
    let response = app
        .client
        .post(format!("{}/webhooks/stripe", app.address))
        .header("Stripe-Signature", format!("t={},v1=deadbeef", ts))
        .header("content-type", "application/json")
        .body(payload.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid signature");

    assert_eq!(app.fetch_order(order_id).await, before);

    app.cleanup().await;
}

#[tokio::test]
async fn paid_event_transitions_order_and_grants_subscription() {
    let app = TestApp::spawn().await;
    let (order_id, product_id) = pending_order(&app, "cs_paid_1", "monthly").await;

    let response = app
        .deliver_webhook(&session_event(
            "checkout.session.completed",
            "cs_paid_1",
            Some("pi_paid_1"),
        ))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");

    let (status, amount_cents, payment_intent) = app.fetch_order(order_id).await;
    assert_eq!(status, "paid");
    assert_eq!(amount_cents, 1999);
    assert_eq!(payment_intent.as_deref(), Some("pi_paid_1"));

    let subscription = app
        .db
        .get_subscription(app.user_id(), product_id)
        .await
        .unwrap()
        .expect("Subscription should exist after paid order");
    assert_eq!(subscription.status, "active");
    assert!(subscription.current_period_end > subscription.current_period_start);

    app.cleanup().await;
}

#[tokio::test]
async fn duplicate_paid_event_is_idempotent() {
    let app = TestApp::spawn().await;
    let (order_id, product_id) = pending_order(&app, "cs_dup_1", "monthly").await;

    let event = session_event("checkout.session.completed", "cs_dup_1", Some("pi_dup_1"));

    let first = app.deliver_webhook(&event).await;
    assert_eq!(first.status().as_u16(), 200);

    let period_end_after_first = app
        .db
        .get_subscription(app.user_id(), product_id)
        .await
        .unwrap()
        .unwrap()
        .current_period_end;

    let second = app.deliver_webhook(&event).await;
    assert_eq!(second.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "paid");
    assert_eq!(app.count_subscriptions().await, 1);

    // No duplicate grant: the period must not have been extended again.
    let period_end_after_second = app
        .db
        .get_subscription(app.user_id(), product_id)
        .await
        .unwrap()
        .unwrap()
        .current_period_end;
    assert_eq!(period_end_after_first, period_end_after_second);

    app.cleanup().await;
}

#[tokio::test]
async fn one_time_product_grants_no_subscription() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_once_1", "one_time").await;

    let response = app
        .deliver_webhook(&session_event(
            "checkout.session.completed",
            "cs_once_1",
            Some("pi_once_1"),
        ))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "paid");
    assert_eq!(app.count_subscriptions().await, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn failed_event_transitions_order_to_failed() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_exp_1", "monthly").await;

    let response = app
        .deliver_webhook(&session_event("checkout.session.expired", "cs_exp_1", None))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "failed");
    assert_eq!(app.count_subscriptions().await, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn refund_after_payment_transitions_order_to_refunded() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_ref_1", "monthly").await;

    let now = chrono::Utc::now().timestamp();
    let paid = app
        .deliver_webhook(&session_event_at(
            "checkout.session.completed",
            "cs_ref_1",
            Some("pi_ref_1"),
            now - 10,
        ))
        .await;
    assert_eq!(paid.status().as_u16(), 200);

    let refunded = app.deliver_webhook(&refund_event("pi_ref_1", now)).await;
    assert_eq!(refunded.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "refunded");

    app.cleanup().await;
}

#[tokio::test]
async fn refund_before_payment_is_retried_not_swallowed() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_ooo_1", "monthly").await;

    let now = chrono::Utc::now().timestamp();

    // Mark the payment reference on the order first so the refund can
    // find it, then deliver the refund ahead of the payment event.
    sqlx::query("UPDATE orders SET payment_intent_ref = 'pi_ooo_1' WHERE order_id = $1")
        .bind(order_id)
        .execute(app.db.pool())
        .await
        .unwrap();

    let premature = app.deliver_webhook(&refund_event("pi_ooo_1", now)).await;
    // Not applicable yet; a non-success response makes the gateway redeliver.
    assert_eq!(premature.status().as_u16(), 500);
    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "pending");

    let paid = app
        .deliver_webhook(&session_event_at(
            "checkout.session.completed",
            "cs_ooo_1",
            Some("pi_ooo_1"),
            now - 10,
        ))
        .await;
    assert_eq!(paid.status().as_u16(), 200);

    let redelivered = app.deliver_webhook(&refund_event("pi_ooo_1", now)).await;
    assert_eq!(redelivered.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "refunded");

    app.cleanup().await;
}

#[tokio::test]
async fn refund_in_the_same_second_as_the_payment_is_applied() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_tie_1", "monthly").await;

    // Gateway timestamps are whole seconds; a refund can legitimately
    // carry the same `created` as the payment event it follows.
    let ts = chrono::Utc::now().timestamp();
    let paid = app
        .deliver_webhook(&session_event_at(
            "checkout.session.completed",
            "cs_tie_1",
            Some("pi_tie_1"),
            ts,
        ))
        .await;
    assert_eq!(paid.status().as_u16(), 200);

    let refunded = app.deliver_webhook(&refund_event("pi_tie_1", ts)).await;
    assert_eq!(refunded.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "refunded");

    app.cleanup().await;
}

#[tokio::test]
async fn stale_event_is_an_idempotent_noop() {
    let app = TestApp::spawn().await;
    let (order_id, _) = pending_order(&app, "cs_stale_1", "monthly").await;

    let now = chrono::Utc::now().timestamp();
    let paid = app
        .deliver_webhook(&session_event_at(
            "checkout.session.completed",
            "cs_stale_1",
            Some("pi_stale_1"),
            now,
        ))
        .await;
    assert_eq!(paid.status().as_u16(), 200);

    // An expiry emitted before the payment arrives late; it must not
    // drag the order backwards.
    let stale = app
        .deliver_webhook(&session_event_at(
            "checkout.session.expired",
            "cs_stale_1",
            None,
            now - 60,
        ))
        .await;
    assert_eq!(stale.status().as_u16(), 200);

    let (status, _, _) = app.fetch_order(order_id).await;
    assert_eq!(status, "paid");

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let app = TestApp::spawn().await;

    let response = app
        .deliver_webhook(&serde_json::json!({
            "id": "evt_other",
            "type": "invoice.finalized",
            "created": chrono::Utc::now().timestamp(),
            "data": { "object": { "id": "in_1", "object": "invoice" } }
        }))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");

    app.cleanup().await;
}

#[tokio::test]
async fn event_for_unknown_session_fails_for_redelivery() {
    let app = TestApp::spawn().await;

    let response = app
        .deliver_webhook(&session_event(
            "checkout.session.completed",
            "cs_nobody_knows",
            Some("pi_x"),
        ))
        .await;

    assert_eq!(response.status().as_u16(), 500);

    app.cleanup().await;
}

#[tokio::test]
async fn renewal_extends_the_subscription_period() {
    let app = TestApp::spawn().await;
    let slug = format!("p-{}", Uuid::new_v4().simple());
    let product_id = app.seed_product(&slug, 1999, "monthly", true).await;

    let now = chrono::Utc::now().timestamp();

    // First billing period.
    app.mount_checkout_success("cs_renew_1").await;
    let first = app
        .create_order(serde_json::json!({ "product_id": product_id }))
        .await;
    assert_eq!(first.status().as_u16(), 201);
    app.deliver_webhook(&session_event_at(
        "checkout.session.completed",
        "cs_renew_1",
        Some("pi_renew_1"),
        now - 10,
    ))
    .await;

    let first_end = app
        .db
        .get_subscription(app.user_id(), product_id)
        .await
        .unwrap()
        .unwrap()
        .current_period_end;

    // Second order for the same product renews rather than duplicating.
    app.gateway.reset().await;
    app.mount_checkout_success("cs_renew_2").await;
    let second = app
        .create_order(serde_json::json!({ "product_id": product_id }))
        .await;
    assert_eq!(second.status().as_u16(), 201);
    app.deliver_webhook(&session_event_at(
        "checkout.session.completed",
        "cs_renew_2",
        Some("pi_renew_2"),
        now,
    ))
    .await;

    assert_eq!(app.count_subscriptions().await, 1);
    let renewed_end = app
        .db
        .get_subscription(app.user_id(), product_id)
        .await
        .unwrap()
        .unwrap()
        .current_period_end;
    assert!(renewed_end > first_end);

    app.cleanup().await;
}
