use chrono::{Datelike, Duration as Days, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    BillingStore, ClientCreditRepository, ClientDirectory, InvoiceRepository, UnitOfWork,
};
use crate::error::{BillingError, Result};
use crate::models::{Invoice, InvoiceStatus, NewInvoice};
use crate::service::with_deadline;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateInvoiceCommand {
    pub client_id: Uuid,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub invoice_date: NaiveDate,
    pub actor_id: Uuid,
    #[serde(default)]
    pub notes: Option<String>,
}

/// 开票: 小计按在用单元数计算, 先用客户信用抵扣
pub struct GenerateInvoiceUseCase {
    store: Arc<dyn BillingStore>,
    timeout: Duration,
}

impl GenerateInvoiceUseCase {
    pub fn new(store: Arc<dyn BillingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[instrument(skip(self, cmd), fields(client_id = %cmd.client_id, period_start = %cmd.billing_period_start))]
    pub async fn execute(&self, cmd: GenerateInvoiceCommand) -> Result<Invoice> {
        let invoice = with_deadline(self.timeout, "generate_invoice", async {
            let mut uow = self.store.begin().await?;
            let invoice = generate_in(uow.as_mut(), cmd).await?;
            uow.commit().await?;
            Ok(invoice)
        })
        .await?;

        tracing::info!(
            invoice_number = invoice.invoice_number(),
            subtotal = %invoice.subtotal(),
            credit_applied = %invoice.credit_applied(),
            total = %invoice.total_amount(),
            "invoice generated"
        );
        Ok(invoice)
    }
}

pub(crate) async fn generate_in(
    uow: &mut dyn UnitOfWork,
    cmd: GenerateInvoiceCommand,
) -> Result<Invoice> {
    let client = uow
        .find_client(cmd.client_id)
        .await?
        .ok_or_else(|| BillingError::not_found("client", cmd.client_id))?;
    if !client.active {
        return Err(BillingError::validation(format!(
            "client {} is inactive",
            client.id
        )));
    }

    // 与收款共用同一信用行锁, 防止开票与收款并发时丢失更新
    let mut credit = uow.lock_credit(client.id).await?;

    if let Some(existing) = uow
        .find_invoice_for_period(client.id, cmd.billing_period_start, cmd.billing_period_end)
        .await?
    {
        return Err(BillingError::conflict(format!(
            "invoice {} already exists for client {} period {}..{}",
            existing.invoice_number(),
            client.id,
            cmd.billing_period_start,
            cmd.billing_period_end
        )));
    }

    let subtotal = client.billing_subtotal()?;
    let credit_applied = credit.balance().min(subtotal);
    let due_date = cmd
        .invoice_date
        .checked_add_signed(Days::days(i64::from(client.payment_terms_days)))
        .ok_or_else(|| BillingError::validation("due date is out of range"))?;

    let invoice_number = uow.next_invoice_number().await?;
    let mut invoice = Invoice::create(NewInvoice {
        invoice_number,
        client_id: client.id,
        billing_period_start: cmd.billing_period_start,
        billing_period_end: cmd.billing_period_end,
        invoice_date: cmd.invoice_date,
        due_date,
        active_units: client.active_units,
        unit_price: client.unit_price,
        credit_applied,
        notes: cmd.notes,
        created_by: cmd.actor_id,
    })?;

    if credit_applied.is_positive() {
        credit.decrement_balance(credit_applied)?;
        uow.save_credit(&credit).await?;
    }
    // 信用全额抵扣的发票直接结清
    if invoice.total_amount().is_zero() {
        invoice.update_status(InvoiceStatus::Paid)?;
    }

    uow.save_invoice(&invoice).await?;
    Ok(invoice)
}

/// 某日期所在自然月的首日和末日
pub fn billing_month(date: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let out_of_range = || BillingError::validation(format!("no billing month for {}", date));
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(out_of_range)?;
    let next_month = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
    .ok_or_else(out_of_range)?;
    let end = next_month.pred_opt().ok_or_else(out_of_range)?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn billing_month_bounds() {
        assert_eq!(
            billing_month(date(2024, 2, 14)).unwrap(),
            (date(2024, 2, 1), date(2024, 2, 29))
        );
        assert_eq!(
            billing_month(date(2023, 12, 31)).unwrap(),
            (date(2023, 12, 1), date(2023, 12, 31))
        );
    }
}
