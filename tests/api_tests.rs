use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use billing_reconciler::api;
use billing_reconciler::config::BillingConfig;
use billing_reconciler::db::InMemoryStore;
use billing_reconciler::models::{ClientAccount, Money};
use billing_reconciler::BillingService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

async fn app_with_client(units: i32, unit_price: i64) -> (Router, InMemoryStore, Uuid) {
    let store = InMemoryStore::new();
    let client_id = Uuid::new_v4();
    store
        .insert_client(ClientAccount {
            id: client_id,
            name: "Lakeside Towers".to_string(),
            active_units: units,
            unit_price: Money::from_minor(unit_price),
            payment_terms_days: 15,
            active: true,
        })
        .await;
    let service = BillingService::new(
        Arc::new(store.clone()),
        &BillingConfig {
            transaction_timeout_ms: 5_000,
            generation_concurrency: 2,
        },
    );
    (api::router(service), store, client_id)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn generate_body(client_id: Uuid) -> Value {
    json!({
        "client_id": client_id,
        "billing_period_start": "2024-05-01",
        "billing_period_end": "2024-05-31",
        "invoice_date": "2024-05-01",
        "actor_id": Uuid::new_v4(),
    })
}

fn payment_body(client_id: Uuid, amount: &str) -> Value {
    json!({
        "client_id": client_id,
        "amount": amount,
        "payment_method": "CHECK",
        "payment_date": "2024-05-10",
        "reference_number": "CHK-1001",
        "actor_id": Uuid::new_v4(),
    })
}

#[tokio::test]
async fn health_check_responds_ok() {
    let (app, _, _) = app_with_client(1, 100).await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn generate_then_pay_over_http() {
    let (app, store, client_id) = app_with_client(4, 2_500).await;

    let (status, invoice) =
        send(&app, "POST", "/api/invoices/generate", Some(generate_body(client_id))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(invoice["invoice_number"], "INV-000001");
    assert_eq!(invoice["total_amount"], "100.00");
    assert_eq!(invoice["status"], "PENDING");
    assert_eq!(invoice["due_date"], "2024-05-16");
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (status, payment) =
        send(&app, "POST", "/api/payments", Some(payment_body(client_id, "130.25"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["payment_number"], "PAY-000001");
    assert_eq!(payment["excess_amount"], "30.25");
    assert_eq!(payment["applications"][0]["invoice_number"], "INV-000001");
    assert_eq!(payment["applications"][0]["amount_applied"], "100.00");

    let (status, fetched) = send(&app, "GET", &format!("/api/invoices/{}", invoice_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "PAID");
    assert_eq!(fetched["balance"], "0.00");

    let payment_id = payment["id"].as_str().unwrap();
    let (status, fetched) = send(&app, "GET", &format!("/api/payments/{}", payment_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["amount"], "130.25");

    let (status, credit) =
        send(&app, "GET", &format!("/api/clients/{}/credit", client_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(credit["balance"], "30.25");
    assert_eq!(store.credit_balance(client_id).await, Money::from_minor(3_025));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let (app, _, client_id) = app_with_client(1, 5_000).await;

    let (status, body) =
        send(&app, "POST", "/api/payments", Some(payment_body(client_id, "0.00"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["retryable"], false);

    let (status, _) =
        send(&app, "POST", "/api/payments", Some(payment_body(Uuid::new_v4(), "10.00"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/api/invoices/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        send(&app, "POST", "/api/invoices/generate", Some(generate_body(client_id))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) =
        send(&app, "POST", "/api/invoices/generate", Some(generate_body(client_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn oversized_amounts_are_rejected_promptly() {
    let (app, _, client_id) = app_with_client(1, 5_000).await;

    for amount in ["1e20000000", "1e-20000000", "1000000000000.00"] {
        let started = std::time::Instant::now();
        let (status, _) =
            send(&app, "POST", "/api/payments", Some(payment_body(client_id, amount))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "amount {}", amount);
        assert!(started.elapsed() < std::time::Duration::from_secs(1), "amount {}", amount);
    }

    let (status, credit) =
        send(&app, "GET", &format!("/api/clients/{}/credit", client_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(credit["balance"], "0.00");
}

#[tokio::test]
async fn void_and_correct_over_http() {
    let (app, store, client_id) = app_with_client(2, 1_000).await;
    store
        .set_credit_balance(client_id, Money::from_minor(500))
        .await
        .unwrap();

    let (_, invoice) =
        send(&app, "POST", "/api/invoices/generate", Some(generate_body(client_id))).await;
    assert_eq!(invoice["credit_applied"], "5.00");
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (status, outcome) = send(
        &app,
        "POST",
        &format!("/api/invoices/{}/correct", invoice_id),
        Some(json!({ "actor_id": Uuid::new_v4(), "invoice_date": "2024-05-02" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["voided"]["status"], "CANCELLED");
    assert_eq!(outcome["replacement"]["invoice_date"], "2024-05-02");
    assert_eq!(outcome["replacement"]["credit_applied"], "5.00");

    let replacement_id = outcome["replacement"]["id"].as_str().unwrap().to_string();
    let (status, voided) = send(
        &app,
        "POST",
        &format!("/api/invoices/{}/void", replacement_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(voided["status"], "CANCELLED");
    assert_eq!(store.credit_balance(client_id).await, Money::from_minor(500));
}

#[tokio::test]
async fn sweep_and_monthly_run_endpoints() {
    let (app, _, client_id) = app_with_client(3, 1_000).await;

    let (status, summary) = send(
        &app,
        "POST",
        "/api/invoices/monthly-run",
        Some(json!({ "invoice_date": "2024-06-01", "actor_id": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["generated"], 1);
    assert_eq!(summary["skipped"], 0);

    let (status, sweep) = send(
        &app,
        "POST",
        "/api/invoices/overdue-sweep",
        Some(json!({ "as_of": "2024-07-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sweep["marked"], 1);
    assert_eq!(sweep["as_of"], "2024-07-01");

    let (status, credit) =
        send(&app, "GET", &format!("/api/clients/{}/credit", client_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(credit["balance"], "0.00");
}
