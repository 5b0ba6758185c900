use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::models::{EntityMeta, Money};

/// 付款方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Check,
    BankTransfer,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Check => "CHECK",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Other => "OTHER",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CASH" => Ok(PaymentMethod::Cash),
            "CHECK" => Ok(PaymentMethod::Check),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "CARD" => Ok(PaymentMethod::Card),
            "OTHER" => Ok(PaymentMethod::Other),
            other => Err(BillingError::validation(format!(
                "unknown payment method {:?}",
                other
            ))),
        }
    }
}

/// 付款在单张发票上的分配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub amount_applied: Money,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_number: String,
    pub client_id: Uuid,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

/// 持久化形态的付款
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub payment_number: String,
    pub client_id: Uuid,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub applications: Vec<PaymentApplication>,
    pub excess_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 收款记录: 在一次对账事务内填充完毕后封存, 之后只读
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    #[serde(flatten)]
    meta: EntityMeta,
    payment_number: String,
    client_id: Uuid,
    amount: Money,
    payment_method: PaymentMethod,
    payment_date: NaiveDate,
    reference_number: Option<String>,
    notes: Option<String>,
    created_by: Uuid,
    applications: Vec<PaymentApplication>,
    excess_amount: Money,
    #[serde(skip)]
    sealed: bool,
}

impl Payment {
    /// 创建空分配的付款
    pub fn create(input: NewPayment) -> Result<Self> {
        if !input.amount.is_positive() {
            return Err(BillingError::validation(format!(
                "payment amount must be positive, got {}",
                input.amount
            )));
        }
        input.amount.ensure_storable()?;
        if input.payment_number.trim().is_empty() {
            return Err(BillingError::validation("payment number is required"));
        }
        if input.client_id.is_nil() {
            return Err(BillingError::validation("payment client id is required"));
        }
        if input.created_by.is_nil() {
            return Err(BillingError::validation("payment creator is required"));
        }

        Ok(Self {
            meta: EntityMeta::new(),
            payment_number: input.payment_number,
            client_id: input.client_id,
            amount: input.amount,
            payment_method: input.payment_method,
            payment_date: input.payment_date,
            reference_number: input.reference_number,
            notes: input.notes,
            created_by: input.created_by,
            applications: Vec::new(),
            excess_amount: Money::ZERO,
            sealed: false,
        })
    }

    pub fn from_persistence(record: PaymentRecord) -> Result<Self> {
        let payment = Self {
            meta: EntityMeta::restore(record.id, record.created_at, record.updated_at, None),
            payment_number: record.payment_number,
            client_id: record.client_id,
            amount: record.amount,
            payment_method: record.payment_method,
            payment_date: record.payment_date,
            reference_number: record.reference_number,
            notes: record.notes,
            created_by: record.created_by,
            applications: record.applications,
            excess_amount: record.excess_amount,
            sealed: true,
        };
        if !payment.is_fully_applied() {
            return Err(BillingError::validation(format!(
                "payment {} applications {} plus excess {} do not equal amount {}",
                payment.payment_number,
                payment.total_applied(),
                payment.excess_amount,
                payment.amount
            )));
        }
        Ok(payment)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sealed {
            return Err(BillingError::validation(format!(
                "payment {} is already recorded and cannot change",
                self.payment_number
            )));
        }
        Ok(())
    }

    pub fn add_invoice_application(
        &mut self,
        invoice_id: Uuid,
        invoice_number: impl Into<String>,
        amount_applied: Money,
    ) -> Result<()> {
        self.ensure_open()?;
        if !amount_applied.is_positive() {
            return Err(BillingError::validation(format!(
                "applied amount must be positive, got {}",
                amount_applied
            )));
        }
        let allocated = self.total_applied() + self.excess_amount + amount_applied;
        if allocated > self.amount {
            return Err(BillingError::validation(format!(
                "cannot apply more than payment amount ({} > {})",
                allocated, self.amount
            )));
        }
        self.applications.push(PaymentApplication {
            invoice_id,
            invoice_number: invoice_number.into(),
            amount_applied,
        });
        Ok(())
    }

    /// 余款 (转入客户信用)
    pub fn set_excess_amount(&mut self, amount: Money) -> Result<()> {
        self.ensure_open()?;
        if amount.is_negative() {
            return Err(BillingError::validation(format!(
                "excess amount must be >= 0, got {}",
                amount
            )));
        }
        if self.total_applied() + amount > self.amount {
            return Err(BillingError::validation(format!(
                "cannot apply more than payment amount ({} > {})",
                self.total_applied() + amount,
                self.amount
            )));
        }
        self.excess_amount = amount;
        Ok(())
    }

    /// 分配完成后封存; 未分配完整的付款不可封存
    pub fn seal(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.is_fully_applied() {
            return Err(BillingError::validation(format!(
                "payment {} is not fully applied ({} applied, {} excess, amount {})",
                self.payment_number,
                self.total_applied(),
                self.excess_amount,
                self.amount
            )));
        }
        self.sealed = true;
        Ok(())
    }

    pub fn total_applied(&self) -> Money {
        self.applications.iter().map(|a| a.amount_applied).sum()
    }

    pub fn is_fully_applied(&self) -> bool {
        self.total_applied() + self.excess_amount == self.amount
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn payment_number(&self) -> &str {
        &self.payment_number
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_date(&self) -> NaiveDate {
        self.payment_date
    }

    pub fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    pub fn applications(&self) -> &[PaymentApplication] {
        &self.applications
    }

    pub fn excess_amount(&self) -> Money {
        self.excess_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: i64) -> Payment {
        Payment::create(NewPayment {
            payment_number: "PAY-000001".into(),
            client_id: Uuid::new_v4(),
            amount: Money::from_minor(amount),
            payment_method: PaymentMethod::BankTransfer,
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reference_number: Some("TRX-1".into()),
            notes: None,
            created_by: Uuid::new_v4(),
        })
        .unwrap()
    }

    #[test]
    fn rejects_non_positive_amount() {
        let err = Payment::create(NewPayment {
            payment_number: "PAY-000001".into(),
            client_id: Uuid::new_v4(),
            amount: Money::ZERO,
            payment_method: PaymentMethod::Cash,
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reference_number: None,
            notes: None,
            created_by: Uuid::new_v4(),
        })
        .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn rejects_amount_beyond_storable_range() {
        let err = Payment::create(NewPayment {
            payment_number: "PAY-000002".into(),
            client_id: Uuid::new_v4(),
            amount: Money::from_minor(Money::MAX.minor() + 1),
            payment_method: PaymentMethod::Cash,
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reference_number: None,
            notes: None,
            created_by: Uuid::new_v4(),
        })
        .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn tracks_applications_and_excess() {
        let mut p = payment(12000);
        p.add_invoice_application(Uuid::new_v4(), "INV-000001", Money::from_minor(10000))
            .unwrap();
        assert!(!p.is_fully_applied());
        p.set_excess_amount(Money::from_minor(2000)).unwrap();
        assert_eq!(p.total_applied(), Money::from_minor(10000));
        assert!(p.is_fully_applied());
        p.seal().unwrap();
        assert!(p.is_sealed());
    }

    #[test]
    fn over_application_is_rejected() {
        let mut p = payment(5000);
        p.add_invoice_application(Uuid::new_v4(), "INV-000001", Money::from_minor(3000))
            .unwrap();
        let err = p
            .add_invoice_application(Uuid::new_v4(), "INV-000002", Money::from_minor(2001))
            .unwrap_err();
        assert!(err.to_string().contains("cannot apply more than payment amount"));
        assert_eq!(p.applications().len(), 1);
        assert!(p.set_excess_amount(Money::from_minor(2001)).is_err());
        assert!(p.set_excess_amount(Money::from_minor(-1)).is_err());
    }

    #[test]
    fn zero_application_is_rejected() {
        let mut p = payment(5000);
        assert!(p
            .add_invoice_application(Uuid::new_v4(), "INV-000001", Money::ZERO)
            .is_err());
    }

    #[test]
    fn sealed_payment_is_immutable() {
        let mut p = payment(100);
        assert!(p.seal().is_err());
        p.set_excess_amount(Money::from_minor(100)).unwrap();
        p.seal().unwrap();
        assert!(p.set_excess_amount(Money::ZERO).is_err());
        assert!(p
            .add_invoice_application(Uuid::new_v4(), "INV-000001", Money::from_minor(1))
            .is_err());
    }

    #[test]
    fn persistence_requires_balanced_allocation() {
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            payment_number: "PAY-000009".into(),
            client_id: Uuid::new_v4(),
            amount: Money::from_minor(500),
            payment_method: PaymentMethod::Check,
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reference_number: None,
            notes: None,
            created_by: Uuid::new_v4(),
            applications: vec![PaymentApplication {
                invoice_id: Uuid::new_v4(),
                invoice_number: "INV-000001".into(),
                amount_applied: Money::from_minor(400),
            }],
            excess_amount: Money::from_minor(50),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(Payment::from_persistence(record.clone()).is_err());

        let balanced = PaymentRecord {
            excess_amount: Money::from_minor(100),
            ..record
        };
        let p = Payment::from_persistence(balanced).unwrap();
        assert!(p.is_sealed());
    }
}
