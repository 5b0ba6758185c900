use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::models::Money;

/// 客户计费档案 (只读), active_units 为客户所有在用楼栋单元数之和
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAccount {
    pub id: Uuid,
    pub name: String,
    pub active_units: i32,
    pub unit_price: Money,
    pub payment_terms_days: i32,
    pub active: bool,
}

impl ClientAccount {
    /// 本期小计 = 在用单元数 * 单价
    pub fn billing_subtotal(&self) -> Result<Money> {
        if self.active_units < 1 {
            return Err(BillingError::validation(format!(
                "client {} has no active units to bill",
                self.id
            )));
        }
        self.unit_price.times(self.active_units)
    }
}
