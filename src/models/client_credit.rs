use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::models::{EntityMeta, Money};

/// 客户信用余额 (每客户一条, 非负)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientCredit {
    #[serde(flatten)]
    meta: EntityMeta,
    client_id: Uuid,
    balance: Money,
}

impl ClientCredit {
    /// 新客户的零余额信用记录
    pub fn open(client_id: Uuid) -> Self {
        Self {
            meta: EntityMeta::new(),
            client_id,
            balance: Money::ZERO,
        }
    }

    pub fn from_persistence(
        id: Uuid,
        client_id: Uuid,
        balance: Money,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let credit = Self {
            meta: EntityMeta::restore(id, created_at, updated_at, None),
            client_id,
            balance,
        };
        credit.validate()?;
        Ok(credit)
    }

    fn validate(&self) -> Result<()> {
        if self.balance.is_negative() {
            return Err(BillingError::validation(format!(
                "credit balance of client {} cannot be negative ({})",
                self.client_id, self.balance
            )));
        }
        self.balance.ensure_storable()?;
        Ok(())
    }

    /// 先在副本上计算并校验, 成功后才写回
    fn commit_balance(&mut self, next: Money) -> Result<()> {
        let candidate = Self {
            balance: next,
            ..self.clone()
        };
        candidate.validate()?;
        self.balance = next;
        self.meta.touch();
        Ok(())
    }

    pub fn increment_balance(&mut self, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "credit increment must be positive, got {}",
                amount
            )));
        }
        let next = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| BillingError::validation("credit balance overflow"))?;
        self.commit_balance(next)
    }

    pub fn decrement_balance(&mut self, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "credit decrement must be positive, got {}",
                amount
            )));
        }
        if amount > self.balance {
            return Err(BillingError::validation(format!(
                "insufficient credit balance: {} available, {} requested",
                self.balance, amount
            )));
        }
        self.commit_balance(self.balance - amount)
    }

    /// 直接设置余额
    pub fn update_balance(&mut self, amount: Money) -> Result<()> {
        if amount.is_negative() {
            return Err(BillingError::validation(format!(
                "credit balance must be >= 0, got {}",
                amount
            )));
        }
        self.commit_balance(amount)
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn balance(&self) -> Money {
        self.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_decrement() {
        let mut credit = ClientCredit::open(Uuid::new_v4());
        credit.increment_balance(Money::from_minor(5000)).unwrap();
        credit.decrement_balance(Money::from_minor(1500)).unwrap();
        assert_eq!(credit.balance(), Money::from_minor(3500));
    }

    #[test]
    fn decrement_never_goes_negative() {
        let mut credit = ClientCredit::open(Uuid::new_v4());
        credit.increment_balance(Money::from_minor(100)).unwrap();
        let err = credit.decrement_balance(Money::from_minor(101)).unwrap_err();
        assert!(err.to_string().contains("insufficient credit balance"));
        assert_eq!(credit.balance(), Money::from_minor(100));
    }

    #[test]
    fn rejects_non_positive_deltas() {
        let mut credit = ClientCredit::open(Uuid::new_v4());
        assert!(credit.increment_balance(Money::ZERO).is_err());
        assert!(credit.decrement_balance(Money::from_minor(-5)).is_err());
    }

    #[test]
    fn update_balance_sets_absolute_value() {
        let mut credit = ClientCredit::open(Uuid::new_v4());
        credit.update_balance(Money::from_minor(4200)).unwrap();
        assert_eq!(credit.balance(), Money::from_minor(4200));
        credit.update_balance(Money::ZERO).unwrap();
        assert_eq!(credit.balance(), Money::ZERO);
        assert!(credit.update_balance(Money::from_minor(-1)).is_err());
    }

    #[test]
    fn increment_past_storable_range_keeps_balance() {
        let mut credit = ClientCredit::open(Uuid::new_v4());
        credit.update_balance(Money::MAX).unwrap();
        let err = credit.increment_balance(Money::from_minor(1)).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(credit.balance(), Money::MAX);
    }

    #[test]
    fn persisted_negative_balance_is_rejected() {
        let now = Utc::now();
        assert!(ClientCredit::from_persistence(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_minor(-1),
            now,
            now
        )
        .is_err());
    }
}
