pub mod correct_invoice;
pub mod generate_invoice;
pub mod monthly_run;
pub mod overdue;
pub mod record_payment;
pub mod scheduler;
pub mod void_invoice;

pub use correct_invoice::{CorrectInvoiceUseCase, CorrectionOutcome};
pub use generate_invoice::{billing_month, GenerateInvoiceCommand, GenerateInvoiceUseCase};
pub use monthly_run::{MonthlyInvoiceRun, MonthlyRunSummary};
pub use overdue::MarkOverdueUseCase;
pub use record_payment::{allocate_payment, RecordPaymentCommand, RecordPaymentUseCase};
pub use void_invoice::VoidInvoiceUseCase;

use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::db::{
    BillingStore, ClientCreditRepository, ClientDirectory, InvoiceRepository, PaymentRepository,
};
use crate::error::{BillingError, Result};
use crate::models::{Invoice, Money, Payment};

/// 事务整体截止时间; 超时即丢弃 future, 未提交的事务随之回滚
pub(crate) async fn with_deadline<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(operation, limit_ms = limit.as_millis() as u64, "transaction deadline exceeded");
            Err(BillingError::Timeout { operation })
        }
    }
}

/// 计费服务: 组合各用例, 供 HTTP 层和调度器共用
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    record_payment: Arc<RecordPaymentUseCase>,
    void_invoice: Arc<VoidInvoiceUseCase>,
    correct_invoice: Arc<CorrectInvoiceUseCase>,
    generate_invoice: Arc<GenerateInvoiceUseCase>,
    mark_overdue: Arc<MarkOverdueUseCase>,
    monthly_run: Arc<MonthlyInvoiceRun>,
}

impl BillingService {
    pub fn new(store: Arc<dyn BillingStore>, config: &BillingConfig) -> Self {
        let timeout = Duration::from_millis(config.transaction_timeout_ms);
        let generate_invoice = Arc::new(GenerateInvoiceUseCase::new(store.clone(), timeout));
        Self {
            record_payment: Arc::new(RecordPaymentUseCase::new(store.clone(), timeout)),
            void_invoice: Arc::new(VoidInvoiceUseCase::new(store.clone(), timeout)),
            correct_invoice: Arc::new(CorrectInvoiceUseCase::new(store.clone(), timeout)),
            mark_overdue: Arc::new(MarkOverdueUseCase::new(store.clone(), timeout)),
            monthly_run: Arc::new(MonthlyInvoiceRun::new(
                store.clone(),
                generate_invoice.clone(),
                config.generation_concurrency,
            )),
            generate_invoice,
            store,
        }
    }

    pub async fn record_payment(&self, cmd: RecordPaymentCommand) -> Result<Payment> {
        self.record_payment.execute(cmd).await
    }

    pub async fn void_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.void_invoice.execute(invoice_id).await
    }

    pub async fn correct_invoice(
        &self,
        invoice_id: Uuid,
        actor_id: Uuid,
        invoice_date: Option<NaiveDate>,
    ) -> Result<CorrectionOutcome> {
        self.correct_invoice.execute(invoice_id, actor_id, invoice_date).await
    }

    pub async fn generate_invoice(&self, cmd: GenerateInvoiceCommand) -> Result<Invoice> {
        self.generate_invoice.execute(cmd).await
    }

    pub async fn mark_overdue(&self, today: NaiveDate) -> Result<usize> {
        self.mark_overdue.execute(today).await
    }

    pub async fn run_monthly(&self, invoice_date: NaiveDate, actor_id: Uuid) -> Result<MonthlyRunSummary> {
        self.monthly_run.execute(invoice_date, actor_id).await
    }

    /// 已软删除的发票视为不存在
    pub async fn find_invoice(&self, id: Uuid) -> Result<Invoice> {
        let mut uow = self.store.begin().await?;
        uow.find_invoice(id)
            .await?
            .filter(|inv| !inv.meta().is_deleted())
            .ok_or_else(|| BillingError::not_found("invoice", id))
    }

    pub async fn find_payment(&self, id: Uuid) -> Result<Payment> {
        let mut uow = self.store.begin().await?;
        uow.find_payment(id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", id))
    }

    /// 客户尚无信用记录时返回零
    pub async fn client_credit_balance(&self, client_id: Uuid) -> Result<Money> {
        let mut uow = self.store.begin().await?;
        if uow.find_client(client_id).await?.is_none() {
            return Err(BillingError::not_found("client", client_id));
        }
        Ok(uow
            .find_credit(client_id)
            .await?
            .map(|credit| credit.balance())
            .unwrap_or(Money::ZERO))
    }
}
