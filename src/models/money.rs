use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::error::{BillingError, Result};

const MINOR_PER_MAJOR: i64 = 100;
/// NUMERIC(14,2) 的整数位数
const MAX_INTEGER_DIGITS: i64 = 12;

/// 金额 (以分为单位的整数)
///
/// 内部运算全部使用整数分, 只在边界 (HTTP, 数据库 NUMERIC 列) 与十进制互转,
/// 因此不存在浮点漂移。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "BigDecimal", into = "BigDecimal")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    /// 999,999,999,999.99
    pub const MAX: Money = Money(99_999_999_999_999);

    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// 十进制 -> 分, 超过两位小数或超出 NUMERIC(14,2) 范围视为非法
    ///
    /// 只在数字串和指数上运算, 巨大指数 (如 `1e1000000000`) 不会展开成大整数。
    pub fn from_decimal(value: &BigDecimal) -> Result<Self> {
        let out_of_range = || BillingError::validation(format!("amount {} is out of range", value));
        let (digits, mut scale) = value.as_bigint_and_exponent();
        let mut text = digits.to_str_radix(10);
        if text == "0" {
            return Ok(Money::ZERO);
        }
        while scale > 2 && text.ends_with('0') {
            text.pop();
            scale -= 1;
        }
        if scale > 2 {
            return Err(BillingError::validation(format!(
                "amount {} has more than 2 fraction digits",
                value
            )));
        }
        // 非零且 scale <= -12 时绝对值已 >= 10^12
        if scale <= -MAX_INTEGER_DIGITS {
            return Err(out_of_range());
        }
        let unscaled: i64 = text.parse().map_err(|_| out_of_range())?;
        10i64
            .checked_pow((2 - scale) as u32)
            .and_then(|factor| unscaled.checked_mul(factor))
            .map(Money)
            .ok_or_else(out_of_range)?
            .ensure_storable()
    }

    /// 可存入 NUMERIC(14,2) 列的金额
    pub fn ensure_storable(self) -> Result<Self> {
        if self.0.unsigned_abs() > Money::MAX.0 as u64 {
            return Err(BillingError::validation(format!(
                "amount {} exceeds the maximum of {}",
                self,
                Money::MAX
            )));
        }
        Ok(self)
    }

    /// 分 -> 十进制 (固定两位小数)
    pub fn to_decimal(self) -> BigDecimal {
        (BigDecimal::from(self.0) / BigDecimal::from(MINOR_PER_MAJOR)).with_scale(2)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// 单价 * 数量, 溢出时报错
    pub fn times(self, units: i32) -> Result<Money> {
        self.0
            .checked_mul(i64::from(units))
            .map(Money)
            .ok_or_else(|| BillingError::validation(format!("{} * {} overflows", self, units)))
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn abs_diff(self, other: Money) -> i64 {
        (self.0 - other.0).abs()
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:02}",
            sign,
            abs / MINOR_PER_MAJOR as u64,
            abs % MINOR_PER_MAJOR as u64
        )
    }
}

impl TryFrom<BigDecimal> for Money {
    type Error = BillingError;

    fn try_from(value: BigDecimal) -> Result<Self> {
        Money::from_decimal(&value)
    }
}

impl From<Money> for BigDecimal {
    fn from(value: Money) -> Self {
        value.to_decimal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn parses_two_fraction_digits() {
        assert_eq!(Money::from_decimal(&dec("123.45")).unwrap().minor(), 12345);
        assert_eq!(Money::from_decimal(&dec("7")).unwrap().minor(), 700);
        assert_eq!(Money::from_decimal(&dec("0.5")).unwrap().minor(), 50);
        assert_eq!(Money::from_decimal(&dec("-3.10")).unwrap().minor(), -310);
    }

    #[test]
    fn rejects_sub_cent_precision() {
        assert!(Money::from_decimal(&dec("1.005")).is_err());
        // 尾随零不算额外精度
        assert_eq!(Money::from_decimal(&dec("1.500")).unwrap().minor(), 150);
    }

    #[test]
    fn to_decimal_has_scale_two() {
        let d = Money::from_minor(5).to_decimal();
        assert_eq!(d.to_string(), "0.05");
        assert_eq!(Money::from_minor(-12345).to_decimal(), dec("-123.45"));
    }

    #[test]
    fn display_formats_cents() {
        assert_eq!(Money::from_minor(12345).to_string(), "123.45");
        assert_eq!(Money::from_minor(-7).to_string(), "-0.07");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn times_detects_overflow() {
        assert_eq!(Money::from_minor(2500).times(4).unwrap(), Money::from_minor(10000));
        assert!(Money::from_minor(i64::MAX).times(2).is_err());
    }

    #[test]
    fn huge_exponents_are_rejected_without_expansion() {
        let started = std::time::Instant::now();
        for text in ["1e1000000000", "1e-1000000000", "1e20000000", "-5e-20000000"] {
            assert!(Money::from_decimal(&dec(text)).is_err(), "{} accepted", text);
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        assert_eq!(Money::from_decimal(&dec("1.2e3")).unwrap().minor(), 120_000);
        assert_eq!(Money::from_decimal(&dec("125e-2")).unwrap().minor(), 125);
        assert_eq!(Money::from_decimal(&dec("0e-50")).unwrap(), Money::ZERO);
    }

    #[test]
    fn amounts_are_bounded_by_column_range() {
        assert_eq!(Money::from_decimal(&dec("999999999999.99")).unwrap(), Money::MAX);
        assert_eq!(
            Money::from_decimal(&dec("-999999999999.99")).unwrap().minor(),
            -Money::MAX.minor()
        );
        assert!(Money::from_decimal(&dec("1000000000000.00")).is_err());
        assert!(Money::from_decimal(&dec("1e12")).is_err());
        assert!(Money::from_decimal(&dec("92233720368547758.07")).is_err());
        assert!(serde_json::from_str::<Money>("\"1e20000000\"").is_err());
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let json = serde_json::to_string(&Money::from_minor(10050)).unwrap();
        assert_eq!(json, "\"100.50\"");
        let back: Money = serde_json::from_str("\"20.25\"").unwrap();
        assert_eq!(back.minor(), 2025);
    }
}
