use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    BillingStore, ClientCreditRepository, ClientDirectory, InvoiceRepository, PaymentRepository,
    UnitOfWork,
};
use crate::error::{BillingError, Result};
use crate::models::{Money, NewPayment, Payment, PaymentMethod};
use crate::service::with_deadline;

/// 收款入参 (金额为十进制, 反序列化时即转成分)
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPaymentCommand {
    pub client_id: Uuid,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub actor_id: Uuid,
}

/// 收款对账: 按 FIFO 把付款分摊到客户的未结清发票, 余款转入客户信用
pub struct RecordPaymentUseCase {
    store: Arc<dyn BillingStore>,
    timeout: Duration,
}

impl RecordPaymentUseCase {
    pub fn new(store: Arc<dyn BillingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[instrument(skip(self, cmd), fields(client_id = %cmd.client_id, amount = %cmd.amount))]
    pub async fn execute(&self, cmd: RecordPaymentCommand) -> Result<Payment> {
        let payment = with_deadline(self.timeout, "record_payment", async {
            let mut uow = self.store.begin().await?;
            let payment = allocate_payment(uow.as_mut(), cmd).await?;
            uow.commit().await?;
            Ok(payment)
        })
        .await?;

        tracing::info!(
            payment_number = payment.payment_number(),
            invoices = payment.applications().len(),
            applied = %payment.total_applied(),
            excess = %payment.excess_amount(),
            "payment recorded"
        );
        Ok(payment)
    }
}

/// 对账核心, 在调用方的事务内执行; 任意一步失败都由调用方整体回滚
pub async fn allocate_payment(
    uow: &mut dyn UnitOfWork,
    cmd: RecordPaymentCommand,
) -> Result<Payment> {
    if !cmd.amount.is_positive() {
        return Err(BillingError::validation(format!(
            "payment amount must be positive, got {}",
            cmd.amount
        )));
    }
    let client = uow
        .find_client(cmd.client_id)
        .await?
        .ok_or_else(|| BillingError::not_found("client", cmd.client_id))?;

    // 加锁顺序: 先信用行, 同一客户的并发收款在此串行
    let mut credit = uow.lock_credit(client.id).await?;

    let payment_number = uow.next_payment_number().await?;
    let mut payment = Payment::create(NewPayment {
        payment_number,
        client_id: client.id,
        amount: cmd.amount,
        payment_method: cmd.payment_method,
        payment_date: cmd.payment_date,
        reference_number: cmd.reference_number,
        notes: cmd.notes,
        created_by: cmd.actor_id,
    })?;

    let mut outstanding = uow.find_outstanding_by_client(client.id).await?;
    outstanding.sort_by(|a, b| a.fifo_cmp(b));

    let mut remaining = cmd.amount;
    for mut invoice in outstanding {
        if !remaining.is_positive() {
            break;
        }
        let apply_amount = remaining.min(invoice.balance());
        invoice.apply_payment(apply_amount)?;
        uow.update_invoice(&invoice).await?;
        payment.add_invoice_application(invoice.id(), invoice.invoice_number(), apply_amount)?;
        remaining -= apply_amount;

        tracing::debug!(
            invoice_number = invoice.invoice_number(),
            applied = %apply_amount,
            balance = %invoice.balance(),
            status = %invoice.status(),
            "payment applied to invoice"
        );
    }

    if remaining.is_positive() {
        payment.set_excess_amount(remaining)?;
        credit.increment_balance(remaining)?;
        uow.save_credit(&credit).await?;
    }

    payment.seal()?;
    uow.save_payment(&payment).await?;
    Ok(payment)
}
