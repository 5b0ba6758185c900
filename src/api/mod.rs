pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

use crate::service::BillingService;

/// 构建路由
pub fn router(service: BillingService) -> Router {
    let invoice_routes = Router::new()
        .route("/api/invoices/generate", post(generate_invoice))
        .route("/api/invoices/overdue-sweep", post(overdue_sweep))
        .route("/api/invoices/monthly-run", post(monthly_run))
        .route("/api/invoices/:id", get(get_invoice))
        .route("/api/invoices/:id/void", post(void_invoice))
        .route("/api/invoices/:id/correct", post(correct_invoice));

    let payment_routes = Router::new()
        .route("/api/payments", post(record_payment))
        .route("/api/payments/:id", get(get_payment))
        .route("/api/clients/:id/credit", get(client_credit));

    Router::new()
        .route("/health", get(health_check))
        .merge(invoice_routes)
        .merge(payment_routes)
        .layer(ServiceBuilder::new())
        .with_state(service)
}
