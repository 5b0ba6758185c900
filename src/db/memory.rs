//! 内存存储
//!
//! 整库一把 `tokio::sync::Mutex`, 在 `UnitOfWork` 存活期间一直持有, 因此事务天然串行。
//! 所有写入先落在暂存副本上, 提交时整体替换; 未提交即丢弃等于回滚。
//! 序号在回滚时同样回退 (Postgres 的 nextval 则会留下空号)。

use async_trait::async_trait;
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db::repository::{
    format_invoice_number, format_payment_number, BillingStore, ClientCreditRepository,
    ClientDirectory, InvoiceRepository, PaymentRepository, UnitOfWork,
};
use crate::error::{BillingError, Result};
use crate::models::{ClientAccount, ClientCredit, Invoice, InvoiceStatus, Money, Payment};

/// 注入的一次性故障, 用于验证回滚
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    SavePayment,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    clients: IndexMap<Uuid, ClientAccount>,
    invoices: IndexMap<Uuid, Invoice>,
    payments: IndexMap<Uuid, Payment>,
    credits: IndexMap<Uuid, ClientCredit>,
    invoice_seq: i64,
    payment_seq: i64,
}

#[derive(Debug, Default)]
struct Shared {
    state: MemoryState,
    fault: Option<Fault>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Shared>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_client(&self, client: ClientAccount) {
        let mut shared = self.inner.lock().await;
        shared.state.clients.insert(client.id, client);
    }

    /// 直接写入一张发票, 同时推进发票序号
    pub async fn insert_invoice(&self, invoice: Invoice) {
        let mut shared = self.inner.lock().await;
        shared.state.invoice_seq += 1;
        shared.state.invoices.insert(invoice.id(), invoice);
    }

    pub async fn set_credit_balance(&self, client_id: Uuid, balance: Money) -> Result<()> {
        let mut shared = self.inner.lock().await;
        let credit = shared
            .state
            .credits
            .entry(client_id)
            .or_insert_with(|| ClientCredit::open(client_id));
        credit.update_balance(balance)
    }

    pub async fn inject_fault(&self, fault: Fault) {
        self.inner.lock().await.fault = Some(fault);
    }

    pub async fn invoice(&self, id: Uuid) -> Option<Invoice> {
        self.inner.lock().await.state.invoices.get(&id).cloned()
    }

    pub async fn invoices_for_client(&self, client_id: Uuid) -> Vec<Invoice> {
        let shared = self.inner.lock().await;
        let mut invoices: Vec<Invoice> = shared
            .state
            .invoices
            .values()
            .filter(|inv| inv.client_id() == client_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.fifo_cmp(b));
        invoices
    }

    pub async fn payments_for_client(&self, client_id: Uuid) -> Vec<Payment> {
        let shared = self.inner.lock().await;
        shared
            .state
            .payments
            .values()
            .filter(|p| p.client_id() == client_id)
            .cloned()
            .collect()
    }

    pub async fn credit_balance(&self, client_id: Uuid) -> Money {
        let shared = self.inner.lock().await;
        shared
            .state
            .credits
            .get(&client_id)
            .map(|c| c.balance())
            .unwrap_or(Money::ZERO)
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.inner.clone().lock_owned().await;
        let staged = guard.state.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Shared>,
    staged: MemoryState,
}

impl MemoryUnitOfWork {
    /// 命中即消费, 不随事务回滚
    fn trip(&mut self, fault: Fault) -> Result<()> {
        if self.guard.fault == Some(fault) {
            self.guard.fault = None;
            return Err(BillingError::Database(sqlx::Error::Protocol(format!(
                "injected fault: {:?}",
                fault
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceRepository for MemoryUnitOfWork {
    async fn find_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.staged.invoices.get(&id).cloned())
    }

    async fn lock_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.staged.invoices.get(&id).cloned())
    }

    async fn find_outstanding_by_client(&mut self, client_id: Uuid) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .staged
            .invoices
            .values()
            .filter(|inv| inv.client_id() == client_id && inv.is_outstanding())
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.fifo_cmp(b));
        Ok(invoices)
    }

    async fn find_invoice_for_period(
        &mut self,
        client_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<Invoice>> {
        Ok(self
            .staged
            .invoices
            .values()
            .find(|inv| inv.covers_period(client_id, period_start, period_end))
            .cloned())
    }

    async fn find_overdue_candidates(&mut self, today: NaiveDate) -> Result<Vec<Invoice>> {
        Ok(self
            .staged
            .invoices
            .values()
            .filter(|inv| {
                !inv.meta().is_deleted()
                    && matches!(
                        inv.status(),
                        InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid
                    )
                    && inv.due_date() < today
                    && inv.balance().is_positive()
            })
            .cloned()
            .collect())
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        let (start, end) = invoice.billing_period();
        if self
            .staged
            .invoices
            .values()
            .any(|inv| inv.covers_period(invoice.client_id(), start, end))
        {
            return Err(BillingError::conflict(
                "invoice for this client and billing period already exists",
            ));
        }
        if self
            .staged
            .invoices
            .values()
            .any(|inv| inv.invoice_number() == invoice.invoice_number())
        {
            return Err(BillingError::conflict(format!(
                "invoice number {} already exists",
                invoice.invoice_number()
            )));
        }
        self.staged.invoices.insert(invoice.id(), invoice.clone());
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        match self.staged.invoices.get_mut(&invoice.id()) {
            Some(existing) => {
                *existing = invoice.clone();
                Ok(())
            }
            None => Err(BillingError::not_found("invoice", invoice.id())),
        }
    }

    async fn next_invoice_number(&mut self) -> Result<String> {
        self.staged.invoice_seq += 1;
        Ok(format_invoice_number(self.staged.invoice_seq))
    }
}

#[async_trait]
impl PaymentRepository for MemoryUnitOfWork {
    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.staged.payments.get(&id).cloned())
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<()> {
        self.trip(Fault::SavePayment)?;
        if self.staged.payments.contains_key(&payment.id()) {
            return Err(BillingError::conflict("payment already exists"));
        }
        self.staged.payments.insert(payment.id(), payment.clone());
        Ok(())
    }

    async fn next_payment_number(&mut self) -> Result<String> {
        self.staged.payment_seq += 1;
        Ok(format_payment_number(self.staged.payment_seq))
    }
}

#[async_trait]
impl ClientCreditRepository for MemoryUnitOfWork {
    async fn find_credit(&mut self, client_id: Uuid) -> Result<Option<ClientCredit>> {
        Ok(self.staged.credits.get(&client_id).cloned())
    }

    async fn lock_credit(&mut self, client_id: Uuid) -> Result<ClientCredit> {
        let credit = self
            .staged
            .credits
            .entry(client_id)
            .or_insert_with(|| ClientCredit::open(client_id));
        Ok(credit.clone())
    }

    async fn save_credit(&mut self, credit: &ClientCredit) -> Result<()> {
        self.staged.credits.insert(credit.client_id(), credit.clone());
        Ok(())
    }
}

#[async_trait]
impl ClientDirectory for MemoryUnitOfWork {
    async fn find_client(&mut self, id: Uuid) -> Result<Option<ClientAccount>> {
        Ok(self.staged.clients.get(&id).cloned())
    }

    async fn list_billable_clients(&mut self) -> Result<Vec<ClientAccount>> {
        Ok(self
            .staged
            .clients
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.trip(Fault::Commit)?;
        let MemoryUnitOfWork { mut guard, staged } = this;
        guard.state = staged;
        Ok(())
    }
}
