use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Money;
use crate::service::{BillingService, GenerateInvoiceCommand, RecordPaymentCommand};

/// 更正请求: 不传开票日期时沿用原发票日期
#[derive(Debug, Deserialize)]
pub struct CorrectInvoiceRequest {
    pub actor_id: Uuid,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
}

/// 逾期扫描请求, 缺省为服务器本地日期
#[derive(Debug, Default, Deserialize)]
pub struct OverdueSweepRequest {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MonthlyRunRequest {
    pub invoice_date: NaiveDate,
    pub actor_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OverdueSweepResponse {
    pub as_of: NaiveDate,
    pub marked: usize,
}

#[derive(Debug, Serialize)]
pub struct CreditResponse {
    pub client_id: Uuid,
    pub balance: Money,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 收款并按 FIFO 对账
pub async fn record_payment(
    State(service): State<BillingService>,
    Json(req): Json<RecordPaymentCommand>,
) -> Response {
    match service.record_payment(req).await {
        Ok(payment) => (StatusCode::CREATED, Json(payment)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_payment(State(service): State<BillingService>, Path(id): Path<Uuid>) -> Response {
    match service.find_payment(id).await {
        Ok(payment) => (StatusCode::OK, Json(payment)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn generate_invoice(
    State(service): State<BillingService>,
    Json(req): Json<GenerateInvoiceCommand>,
) -> Response {
    match service.generate_invoice(req).await {
        Ok(invoice) => (StatusCode::CREATED, Json(invoice)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_invoice(State(service): State<BillingService>, Path(id): Path<Uuid>) -> Response {
    match service.find_invoice(id).await {
        Ok(invoice) => (StatusCode::OK, Json(invoice)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn void_invoice(State(service): State<BillingService>, Path(id): Path<Uuid>) -> Response {
    match service.void_invoice(id).await {
        Ok(invoice) => (StatusCode::OK, Json(invoice)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn correct_invoice(
    State(service): State<BillingService>,
    Path(id): Path<Uuid>,
    Json(req): Json<CorrectInvoiceRequest>,
) -> Response {
    match service.correct_invoice(id, req.actor_id, req.invoice_date).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn overdue_sweep(
    State(service): State<BillingService>,
    Json(req): Json<OverdueSweepRequest>,
) -> Response {
    let as_of = req.as_of.unwrap_or_else(|| Local::now().date_naive());
    match service.mark_overdue(as_of).await {
        Ok(marked) => (StatusCode::OK, Json(OverdueSweepResponse { as_of, marked })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 月度批量开票
pub async fn monthly_run(
    State(service): State<BillingService>,
    Json(req): Json<MonthlyRunRequest>,
) -> Response {
    match service.run_monthly(req.invoice_date, req.actor_id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn client_credit(
    State(service): State<BillingService>,
    Path(client_id): Path<Uuid>,
) -> Response {
    match service.client_credit_balance(client_id).await {
        Ok(balance) => (StatusCode::OK, Json(CreditResponse { client_id, balance })).into_response(),
        Err(e) => e.into_response(),
    }
}
