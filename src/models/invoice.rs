use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::models::{EntityMeta, Money};

/// 小计允许的舍入误差 (分)
const SUBTOTAL_TOLERANCE_MINOR: i64 = 1;

/// 发票状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// 显式白名单, 不做推断
    pub fn allowed_transitions(&self) -> &'static [InvoiceStatus] {
        use InvoiceStatus::*;
        match self {
            Pending => &[PartiallyPaid, Paid, Overdue, Cancelled],
            PartiallyPaid => &[Paid, Overdue, Cancelled],
            Overdue => &[Paid, PartiallyPaid, Cancelled],
            Paid => &[Cancelled],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(InvoiceStatus::Pending),
            "PARTIALLY_PAID" => Ok(InvoiceStatus::PartiallyPaid),
            "PAID" => Ok(InvoiceStatus::Paid),
            "OVERDUE" => Ok(InvoiceStatus::Overdue),
            "CANCELLED" => Ok(InvoiceStatus::Cancelled),
            other => Err(BillingError::validation(format!(
                "unknown invoice status {:?}",
                other
            ))),
        }
    }
}

/// 新建发票的输入
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub client_id: Uuid,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub active_units: i32,
    pub unit_price: Money,
    pub credit_applied: Money,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

/// 持久化形态的发票 (从数据库行恢复时使用)
#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub active_units: i32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub credit_applied: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub balance: Money,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// 发票聚合
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    #[serde(flatten)]
    meta: EntityMeta,
    invoice_number: String,
    client_id: Uuid,
    billing_period_start: NaiveDate,
    billing_period_end: NaiveDate,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    active_units: i32,
    unit_price: Money,
    subtotal: Money,
    credit_applied: Money,
    total_amount: Money,
    amount_paid: Money,
    balance: Money,
    status: InvoiceStatus,
    notes: Option<String>,
    created_by: Uuid,
}

impl Invoice {
    /// 新建发票: 状态 PENDING, 未付款, 余额 = 总额
    pub fn create(input: NewInvoice) -> Result<Self> {
        let subtotal = input.unit_price.times(input.active_units)?;
        let total_amount = subtotal - input.credit_applied;
        let invoice = Self {
            meta: EntityMeta::new(),
            invoice_number: input.invoice_number,
            client_id: input.client_id,
            billing_period_start: input.billing_period_start,
            billing_period_end: input.billing_period_end,
            invoice_date: input.invoice_date,
            due_date: input.due_date,
            active_units: input.active_units,
            unit_price: input.unit_price,
            subtotal,
            credit_applied: input.credit_applied,
            total_amount,
            amount_paid: Money::ZERO,
            balance: total_amount,
            status: InvoiceStatus::Pending,
            notes: input.notes,
            created_by: input.created_by,
        };
        invoice.validate()?;
        Ok(invoice)
    }

    pub fn from_persistence(record: InvoiceRecord) -> Result<Self> {
        let invoice = Self {
            meta: EntityMeta::restore(
                record.id,
                record.created_at,
                record.updated_at,
                record.deleted_at,
            ),
            invoice_number: record.invoice_number,
            client_id: record.client_id,
            billing_period_start: record.billing_period_start,
            billing_period_end: record.billing_period_end,
            invoice_date: record.invoice_date,
            due_date: record.due_date,
            active_units: record.active_units,
            unit_price: record.unit_price,
            subtotal: record.subtotal,
            credit_applied: record.credit_applied,
            total_amount: record.total_amount,
            amount_paid: record.amount_paid,
            balance: record.balance,
            status: record.status,
            notes: record.notes,
            created_by: record.created_by,
        };
        invoice.validate()?;
        Ok(invoice)
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(BillingError::Validation(format!("invoice {}: {}", self.invoice_number, msg)));

        if self.invoice_number.trim().is_empty() {
            return Err(BillingError::validation("invoice number is required"));
        }
        if self.client_id.is_nil() {
            return fail("client id is required".to_string());
        }
        if self.created_by.is_nil() {
            return fail("creator is required".to_string());
        }
        if self.billing_period_start > self.billing_period_end {
            return fail(format!(
                "billing period start {} is after end {}",
                self.billing_period_start, self.billing_period_end
            ));
        }
        if self.due_date < self.invoice_date {
            return fail(format!(
                "due date {} precedes invoice date {}",
                self.due_date, self.invoice_date
            ));
        }
        if self.active_units < 1 {
            return fail(format!("active units must be >= 1, got {}", self.active_units));
        }
        if self.unit_price.is_negative() {
            return fail(format!("unit price must be >= 0, got {}", self.unit_price));
        }
        let expected = self.unit_price.times(self.active_units)?.ensure_storable()?;
        if self.subtotal.abs_diff(expected) > SUBTOTAL_TOLERANCE_MINOR {
            return fail(format!(
                "subtotal {} does not equal {} units * {}",
                self.subtotal, self.active_units, self.unit_price
            ));
        }
        if self.credit_applied.is_negative() || self.credit_applied > self.subtotal {
            return fail(format!(
                "credit applied {} must be within 0..={}",
                self.credit_applied, self.subtotal
            ));
        }
        if self.total_amount != self.subtotal - self.credit_applied {
            return fail(format!(
                "total {} does not equal subtotal {} minus credit {}",
                self.total_amount, self.subtotal, self.credit_applied
            ));
        }
        if self.amount_paid.is_negative() || self.balance.is_negative() {
            return fail(format!(
                "amount paid {} and balance {} must be non-negative",
                self.amount_paid, self.balance
            ));
        }
        if self.amount_paid + self.balance != self.total_amount {
            return fail(format!(
                "amount paid {} plus balance {} does not equal total {}",
                self.amount_paid, self.balance, self.total_amount
            ));
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.meta.is_deleted() {
            return Err(BillingError::validation(format!(
                "invoice {} is deleted",
                self.invoice_number
            )));
        }
        Ok(())
    }

    /// 入账: 所有计算都在整数分上进行, 校验通过后才写回
    pub fn apply_payment(&mut self, amount: Money) -> Result<()> {
        self.ensure_live()?;
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }
        if self.status == InvoiceStatus::Cancelled {
            return Err(BillingError::validation(format!(
                "cannot apply payment to cancelled invoice {}",
                self.invoice_number
            )));
        }
        if amount > self.balance {
            return Err(BillingError::validation(format!(
                "payment {} exceeds balance {} of invoice {}",
                amount, self.balance, self.invoice_number
            )));
        }

        let amount_paid = self.amount_paid + amount;
        let balance = self.total_amount - amount_paid;
        let next = if balance.is_zero() {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };
        if next != self.status && !self.status.can_transition_to(next) {
            return Err(BillingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.amount_paid = amount_paid;
        self.balance = balance;
        self.status = next;
        self.meta.touch();
        Ok(())
    }

    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        self.status.can_transition_to(next)
    }

    pub fn update_status(&mut self, next: InvoiceStatus) -> Result<()> {
        self.ensure_live()?;
        if !self.status.can_transition_to(next) {
            return Err(BillingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.meta.touch();
        Ok(())
    }

    /// 到期未结清则标记逾期, 返回是否发生变化
    pub fn mark_as_overdue(&mut self, today: NaiveDate) -> Result<bool> {
        let eligible = !self.meta.is_deleted()
            && matches!(
                self.status,
                InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid
            )
            && self.due_date < today
            && self.balance.is_positive();
        if !eligible {
            return Ok(false);
        }
        self.update_status(InvoiceStatus::Overdue)?;
        Ok(true)
    }

    /// 作废: 只允许未付款的发票
    pub fn cancel(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.amount_paid.is_positive() {
            return Err(BillingError::conflict(format!(
                "invoice {} has payments of {} and cannot be voided",
                self.invoice_number, self.amount_paid
            )));
        }
        self.update_status(InvoiceStatus::Cancelled)
    }

    /// 软删除 (墓碑), 已收款且未作废的发票不可删除
    pub fn soft_delete(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.amount_paid.is_positive() && self.status != InvoiceStatus::Cancelled {
            return Err(BillingError::conflict(format!(
                "invoice {} has payments and cannot be deleted",
                self.invoice_number
            )));
        }
        self.meta.mark_deleted();
        Ok(())
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }

    pub fn is_outstanding(&self) -> bool {
        !self.meta.is_deleted() && !self.is_cancelled() && self.balance.is_positive()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == InvoiceStatus::Overdue || (self.is_outstanding() && self.due_date < today)
    }

    pub fn covers_period(&self, client_id: Uuid, start: NaiveDate, end: NaiveDate) -> bool {
        self.client_id == client_id
            && self.billing_period_start == start
            && self.billing_period_end == end
            && !self.is_cancelled()
            && !self.meta.is_deleted()
    }

    /// FIFO 顺序: 开票日期升序, 同日按发票号升序
    pub fn fifo_cmp(&self, other: &Invoice) -> Ordering {
        self.invoice_date
            .cmp(&other.invoice_date)
            .then_with(|| self.invoice_number.len().cmp(&other.invoice_number.len()))
            .then_with(|| self.invoice_number.cmp(&other.invoice_number))
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn billing_period(&self) -> (NaiveDate, NaiveDate) {
        (self.billing_period_start, self.billing_period_end)
    }

    pub fn invoice_date(&self) -> NaiveDate {
        self.invoice_date
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn active_units(&self) -> i32 {
        self.active_units
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn credit_applied(&self) -> Money {
        self.credit_applied
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> Uuid {
        self.created_by
    }
}
