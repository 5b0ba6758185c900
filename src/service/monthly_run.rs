use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{BillingStore, ClientDirectory};
use crate::error::{BillingError, Result};
use crate::models::Money;
use crate::service::generate_invoice::{billing_month, GenerateInvoiceCommand, GenerateInvoiceUseCase};

/// 月度开票统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonthlyRunSummary {
    pub clients: usize,
    pub generated: usize,
    /// 本月已开票或无在用单元的客户
    pub skipped: usize,
    pub failed: usize,
    pub credit_applied: Money,
}

/// 为所有在用客户生成 `invoice_date` 所在月份的发票, 每个客户独立事务
pub struct MonthlyInvoiceRun {
    store: Arc<dyn BillingStore>,
    generate: Arc<GenerateInvoiceUseCase>,
    concurrency: usize,
}

impl MonthlyInvoiceRun {
    pub fn new(
        store: Arc<dyn BillingStore>,
        generate: Arc<GenerateInvoiceUseCase>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            generate,
            concurrency: concurrency.max(1),
        }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, invoice_date: NaiveDate, actor_id: Uuid) -> Result<MonthlyRunSummary> {
        let (period_start, period_end) = billing_month(invoice_date)?;

        // 只读取客户列表, 随即释放事务, 后面每个客户各自开事务
        let clients = {
            let mut uow = self.store.begin().await?;
            uow.list_billable_clients().await?
        };

        let mut summary = MonthlyRunSummary {
            clients: clients.len(),
            ..Default::default()
        };

        let results: Vec<(Uuid, Result<Money>)> = stream::iter(clients)
            .map(|client| {
                let generate = Arc::clone(&self.generate);
                async move {
                    if client.active_units < 1 {
                        return (client.id, Err(BillingError::validation("no active units")));
                    }
                    let result = generate
                        .execute(GenerateInvoiceCommand {
                            client_id: client.id,
                            billing_period_start: period_start,
                            billing_period_end: period_end,
                            invoice_date,
                            actor_id,
                            notes: None,
                        })
                        .await
                        .map(|invoice| invoice.credit_applied());
                    (client.id, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (client_id, result) in results {
            match result {
                Ok(credit) => {
                    summary.generated += 1;
                    summary.credit_applied += credit;
                }
                Err(e @ (BillingError::Conflict(_) | BillingError::Validation(_))) => {
                    tracing::warn!(%client_id, error = %e, "client skipped");
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(%client_id, error = %e, "invoice generation failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            %period_start,
            %period_end,
            clients = summary.clients,
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failed,
            "monthly invoice run finished"
        );
        Ok(summary)
    }
}
