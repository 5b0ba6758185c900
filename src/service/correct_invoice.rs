use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{BillingStore, InvoiceRepository, UnitOfWork};
use crate::error::{BillingError, Result};
use crate::models::Invoice;
use crate::service::generate_invoice::{generate_in, GenerateInvoiceCommand};
use crate::service::void_invoice::void_in;
use crate::service::with_deadline;

/// 更正结果: 被作废的原发票和重开的新发票
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionOutcome {
    pub voided: Invoice,
    pub replacement: Invoice,
}

/// 更正发票: 作废原发票后按当前客户数据重开同一账期, 两步在同一事务内
pub struct CorrectInvoiceUseCase {
    store: Arc<dyn BillingStore>,
    timeout: Duration,
}

impl CorrectInvoiceUseCase {
    pub fn new(store: Arc<dyn BillingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// 原发票已作废且同账期已有有效发票时直接返回, 重复调用不会再开票
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        invoice_id: Uuid,
        actor_id: Uuid,
        invoice_date: Option<NaiveDate>,
    ) -> Result<CorrectionOutcome> {
        let outcome = with_deadline(self.timeout, "correct_invoice", async {
            let mut uow = self.store.begin().await?;
            let outcome = correct_in(uow.as_mut(), invoice_id, actor_id, invoice_date).await?;
            uow.commit().await?;
            Ok(outcome)
        })
        .await?;

        tracing::info!(
            voided = outcome.voided.invoice_number(),
            replacement = outcome.replacement.invoice_number(),
            total = %outcome.replacement.total_amount(),
            "invoice corrected"
        );
        Ok(outcome)
    }
}

async fn correct_in(
    uow: &mut dyn UnitOfWork,
    invoice_id: Uuid,
    actor_id: Uuid,
    invoice_date: Option<NaiveDate>,
) -> Result<CorrectionOutcome> {
    let original = uow
        .find_invoice(invoice_id)
        .await?
        .filter(|inv| !inv.meta().is_deleted())
        .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;
    let (period_start, period_end) = original.billing_period();

    let voided = if original.is_cancelled() {
        if let Some(replacement) = uow
            .find_invoice_for_period(original.client_id(), period_start, period_end)
            .await?
        {
            return Ok(CorrectionOutcome {
                voided: original,
                replacement,
            });
        }
        original
    } else {
        void_in(uow, invoice_id).await?
    };

    let replacement = generate_in(
        uow,
        GenerateInvoiceCommand {
            client_id: voided.client_id(),
            billing_period_start: period_start,
            billing_period_end: period_end,
            invoice_date: invoice_date.unwrap_or(voided.invoice_date()),
            actor_id,
            notes: Some(format!("Replaces {}", voided.invoice_number())),
        },
    )
    .await?;

    Ok(CorrectionOutcome {
        voided,
        replacement,
    })
}
