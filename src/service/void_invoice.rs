use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{BillingStore, ClientCreditRepository, InvoiceRepository, UnitOfWork};
use crate::error::{BillingError, Result};
use crate::models::Invoice;
use crate::service::with_deadline;

/// 作废未付款发票, 并退回其占用的客户信用
pub struct VoidInvoiceUseCase {
    store: Arc<dyn BillingStore>,
    timeout: Duration,
}

impl VoidInvoiceUseCase {
    pub fn new(store: Arc<dyn BillingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, invoice_id: Uuid) -> Result<Invoice> {
        let invoice = with_deadline(self.timeout, "void_invoice", async {
            let mut uow = self.store.begin().await?;
            let invoice = void_in(uow.as_mut(), invoice_id).await?;
            uow.commit().await?;
            Ok(invoice)
        })
        .await?;

        tracing::info!(
            invoice_number = invoice.invoice_number(),
            credit_restored = %invoice.credit_applied(),
            "invoice voided"
        );
        Ok(invoice)
    }
}

pub(crate) async fn void_in(uow: &mut dyn UnitOfWork, invoice_id: Uuid) -> Result<Invoice> {
    let snapshot = uow
        .find_invoice(invoice_id)
        .await?
        .filter(|inv| !inv.meta().is_deleted())
        .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;

    // 与收款相同的加锁顺序: 信用行在前, 发票行在后
    let mut credit = uow.lock_credit(snapshot.client_id()).await?;
    let mut invoice = uow
        .lock_invoice(invoice_id)
        .await?
        .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;

    if invoice.is_cancelled() {
        return Err(BillingError::conflict(format!(
            "invoice {} is already voided",
            invoice.invoice_number()
        )));
    }
    if invoice.amount_paid().is_positive() {
        return Err(BillingError::conflict(format!(
            "invoice {} has payments of {} and cannot be voided",
            invoice.invoice_number(),
            invoice.amount_paid()
        )));
    }

    invoice.cancel()?;
    if invoice.credit_applied().is_positive() {
        credit.increment_balance(invoice.credit_applied())?;
        uow.save_credit(&credit).await?;
    }
    uow.update_invoice(&invoice).await?;
    Ok(invoice)
}
