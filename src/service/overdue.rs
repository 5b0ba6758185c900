use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::db::{BillingStore, InvoiceRepository, UnitOfWork};
use crate::error::Result;
use crate::service::with_deadline;

/// 逾期扫描: 到期日早于今天且仍有余额的待付/部分付款发票标记为 OVERDUE
pub struct MarkOverdueUseCase {
    store: Arc<dyn BillingStore>,
    timeout: Duration,
}

impl MarkOverdueUseCase {
    pub fn new(store: Arc<dyn BillingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// 返回本次标记的发票数
    #[instrument(skip(self))]
    pub async fn execute(&self, today: NaiveDate) -> Result<usize> {
        let marked = with_deadline(self.timeout, "mark_overdue", async {
            let mut uow = self.store.begin().await?;
            let marked = mark_overdue_in(uow.as_mut(), today).await?;
            uow.commit().await?;
            Ok(marked)
        })
        .await?;

        tracing::info!(marked, %today, "overdue sweep finished");
        Ok(marked)
    }
}

pub(crate) async fn mark_overdue_in(uow: &mut dyn UnitOfWork, today: NaiveDate) -> Result<usize> {
    let candidates = uow.find_overdue_candidates(today).await?;
    let mut marked = 0;
    for mut invoice in candidates {
        if invoice.mark_as_overdue(today)? {
            uow.update_invoice(&invoice).await?;
            marked += 1;
        }
    }
    Ok(marked)
}
