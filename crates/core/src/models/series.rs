use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::serde_helpers::flexible_f64_or_zero;

/// Generic (date, value) pair — the unit all derivations work on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatedValue {
    pub date: NaiveDate,
    pub value: f64,
}

impl DatedValue {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Anything dated, so ordering can be checked without knowing the payload.
pub trait Dated {
    fn date(&self) -> NaiveDate;
}

impl Dated for DatedValue {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// One day of account equity, valued server-side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,

    #[serde(default, alias = "usd", alias = "equityUsd", deserialize_with = "flexible_f64_or_zero")]
    pub equity_usd: f64,

    #[serde(default, alias = "btc", alias = "equityBtc", deserialize_with = "flexible_f64_or_zero")]
    pub equity_btc: f64,
}

impl Dated for EquityPoint {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// One day of perpetual-futures funding. Both legs are positive amounts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingPoint {
    pub date: NaiveDate,

    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    pub paid: f64,

    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    pub received: f64,
}

impl FundingPoint {
    /// Income minus expense for the day.
    pub fn net(&self) -> f64 {
        self.received - self.paid
    }
}

impl Dated for FundingPoint {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// One day of BTC holdings and their USD value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BtcPoint {
    pub date: NaiveDate,

    #[serde(default, alias = "btc", alias = "amountBtc", deserialize_with = "flexible_f64_or_zero")]
    pub amount_btc: f64,

    #[serde(default, alias = "usd", alias = "valueUsd", deserialize_with = "flexible_f64_or_zero")]
    pub value_usd: f64,
}

impl BtcPoint {
    /// Implied BTC price for the day, or `None` when nothing was held.
    pub fn implied_price(&self) -> Option<f64> {
        (self.amount_btc > 0.0).then(|| self.value_usd / self.amount_btc)
    }
}

impl Dated for BtcPoint {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Project a field out of a point sequence into the generic form.
pub fn project<T, F>(points: &[T], field: F) -> Vec<DatedValue>
where
    T: Dated,
    F: Fn(&T) -> f64,
{
    points
        .iter()
        .map(|p| DatedValue::new(p.date(), field(p)))
        .collect()
}
