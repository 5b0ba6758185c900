//! 仓储接口
//!
//! 所有读写都发生在一个 `UnitOfWork` 内; 未提交即丢弃的 `UnitOfWork` 整体回滚。
//! 加锁顺序固定: 先客户信用行, 再按 FIFO 顺序锁发票行。

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ClientAccount, ClientCredit, Invoice, Payment};

#[async_trait]
pub trait InvoiceRepository: Send {
    async fn find_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>>;

    /// 读取并加行锁
    async fn lock_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>>;

    /// 未结清发票 (余额 > 0 且未作废), 按开票日期、发票号升序, 并加行锁
    async fn find_outstanding_by_client(&mut self, client_id: Uuid) -> Result<Vec<Invoice>>;

    /// 同客户同账期的有效发票 (忽略已作废和已删除)
    async fn find_invoice_for_period(
        &mut self,
        client_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Invoice>>;

    /// 到期未付、可标记逾期的发票; 已被其他事务锁住的行跳过
    async fn find_overdue_candidates(&mut self, today: NaiveDate) -> Result<Vec<Invoice>>;

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<()>;

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<()>;

    async fn next_invoice_number(&mut self) -> Result<String>;
}

#[async_trait]
pub trait PaymentRepository: Send {
    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>>;

    async fn save_payment(&mut self, payment: &Payment) -> Result<()>;

    async fn next_payment_number(&mut self) -> Result<String>;
}

#[async_trait]
pub trait ClientCreditRepository: Send {
    async fn find_credit(&mut self, client_id: Uuid) -> Result<Option<ClientCredit>>;

    /// 锁定客户信用行, 不存在则以零余额创建
    async fn lock_credit(&mut self, client_id: Uuid) -> Result<ClientCredit>;

    async fn save_credit(&mut self, credit: &ClientCredit) -> Result<()>;
}

/// 客户目录 (只读)
#[async_trait]
pub trait ClientDirectory: Send {
    async fn find_client(&mut self, id: Uuid) -> Result<Option<ClientAccount>>;

    async fn list_billable_clients(&mut self) -> Result<Vec<ClientAccount>>;
}

#[async_trait]
pub trait UnitOfWork:
    InvoiceRepository + PaymentRepository + ClientCreditRepository + ClientDirectory + Send
{
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

pub fn format_invoice_number(seq: i64) -> String {
    format!("INV-{:06}", seq)
}

pub fn format_payment_number(seq: i64) -> String {
    format!("PAY-{:06}", seq)
}
