use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::serde_helpers::flexible_f64_or_zero;
use super::series::DatedValue;

/// Lookback window selected in the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Today,
    Week,
    Month,
    #[default]
    All,
}

impl Period {
    /// Number of days the window spans; `None` for the unbounded window.
    pub fn lookback_days(&self) -> Option<u32> {
        match self {
            Period::Today => Some(1),
            Period::Week => Some(7),
            Period::Month => Some(30),
            Period::All => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Week => "week",
            Period::Month => "month",
            Period::All => "all",
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend-computed total per lookback window.
///
/// The client never re-sums these from transactions; it only selects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct PeriodTotals<T> {
    pub today: T,
    pub week: T,
    pub month: T,
    pub all: T,
}

impl<T> PeriodTotals<T> {
    pub fn get(&self, period: Period) -> &T {
        match period {
            Period::Today => &self.today,
            Period::Week => &self.week,
            Period::Month => &self.month,
            Period::All => &self.all,
        }
    }
}

/// Funding figures for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingTotal {
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    pub paid: f64,
    #[serde(default, deserialize_with = "flexible_f64_or_zero")]
    pub received: f64,
}

impl FundingTotal {
    pub fn net(&self) -> f64 {
        self.received - self.paid
    }
}

/// Lifetime maker/taker fee totals as reported by the fee summary endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeeTotals {
    pub maker_total: f64,
    pub taker_total: f64,
    pub maker_percent: f64,
    pub taker_percent: f64,
}

impl FeeTotals {
    pub fn total(&self) -> f64 {
        self.maker_total + self.taker_total
    }
}

/// Period-scoped maker/taker split, estimated by proportional scaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub period: Period,
    pub total: f64,
    pub maker: f64,
    pub taker: f64,
}

/// Lifetime fee totals plus the estimated split for the selected period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeReport {
    pub lifetime: FeeTotals,
    pub breakdown: FeeBreakdown,
}

/// Chart Y-axis bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YDomain {
    pub min: f64,
    pub max: f64,
}

/// Statistics shared by every level-type series (equity, BTC holdings).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStats {
    pub first: f64,
    pub last: f64,
    pub change: f64,
    pub percent_change: f64,
    pub best_day: Option<DatedValue>,
    pub worst_day: Option<DatedValue>,
    pub average_daily_change: f64,
    pub days: i64,
    pub domain: Option<YDomain>,
}

/// Derived view of the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquitySummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub usd: SeriesStats,
    pub btc: SeriesStats,
    /// Largest peak-to-trough decline of the USD curve, in percent (≥ 0).
    pub max_drawdown_pct: f64,
}

/// Derived view of daily funding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundingSummary {
    /// Running net funding to date, one point per day.
    pub cumulative: Vec<DatedValue>,
    pub total_paid: f64,
    pub total_received: f64,
    pub net: f64,
    /// Largest day-over-day rise of the daily net; `None` below two days.
    pub best_day: Option<DatedValue>,
    /// Largest day-over-day fall of the daily net; `None` below two days.
    pub worst_day: Option<DatedValue>,
    pub average_daily_change: f64,
    /// Day with the highest net funding received.
    pub best_funding_day: Option<DatedValue>,
    /// Day with the highest net funding paid.
    pub worst_funding_day: Option<DatedValue>,
    pub average_daily_funding: f64,
    pub days: i64,
    /// Backend totals for the selected window, when they were fetched.
    pub period_total: Option<FundingTotal>,
}

/// Derived view of BTC accumulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BtcSummary {
    pub stats: SeriesStats,
    pub current_value_usd: f64,
    /// Estimated average entry price. See
    /// [`estimate_entry_price`](crate::services::series_service::estimate_entry_price)
    /// for why this is only an approximation.
    pub estimated_entry_price: Option<f64>,
    pub current_price: Option<f64>,
}

/// The four fetch-and-derive series the facade exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SeriesKind {
    Equity,
    Funding,
    Fees,
    Btc,
}

/// Loading/error state of one series, for the UI to observe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum SeriesStatus {
    #[default]
    Idle,
    Loading,
    /// Loaded; `false` means the backend returned no data.
    Ready { has_data: bool },
    Failed(String),
}
