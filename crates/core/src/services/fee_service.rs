use crate::errors::CoreError;
use crate::models::metrics::{FeeBreakdown, FeeTotals, Period};
use crate::models::serde_helpers::parse_decimal;

/// Estimates period-scoped maker/taker fees.
///
/// The backend only reports the maker/taker split over the account lifetime,
/// plus a separate fee total per period. The period split is obtained by
/// scaling the period total with the lifetime ratio, which assumes the
/// maker/taker mix does not change over time. Keep it that way unless
/// trade-level fee data becomes available.
pub struct FeeService;

impl FeeService {
    pub fn new() -> Self {
        Self
    }

    /// Parse the decimal-string lifetime totals the backend sends.
    pub fn parse_totals(
        &self,
        maker_total: &str,
        taker_total: &str,
        maker_percent: f64,
        taker_percent: f64,
    ) -> Result<FeeTotals, CoreError> {
        let maker_total = parse_decimal(maker_total)
            .map_err(|e| CoreError::Deserialization(format!("maker_total: {e}")))?;
        let taker_total = parse_decimal(taker_total)
            .map_err(|e| CoreError::Deserialization(format!("taker_total: {e}")))?;
        Ok(FeeTotals {
            maker_total,
            taker_total,
            maker_percent,
            taker_percent,
        })
    }

    /// Split `period_total` into maker/taker using the lifetime ratio.
    /// Both parts are 0 when the lifetime totals are 0.
    pub fn blend(&self, lifetime: &FeeTotals, period: Period, period_total: f64) -> FeeBreakdown {
        let denominator = lifetime.total();
        let (maker, taker) = if denominator == 0.0 {
            (0.0, 0.0)
        } else {
            (
                period_total * lifetime.maker_total / denominator,
                period_total * lifetime.taker_total / denominator,
            )
        };

        FeeBreakdown {
            period,
            total: period_total,
            maker,
            taker,
        }
    }

    /// Fees as a percentage of absolute PnL. Reported as 0 when PnL is 0;
    /// that is a display convention, not an economic statement.
    pub fn impact_on_pnl(&self, total_fees: f64, pnl: f64) -> f64 {
        if pnl == 0.0 {
            0.0
        } else {
            total_fees / pnl.abs() * 100.0
        }
    }
}

impl Default for FeeService {
    fn default() -> Self {
        Self::new()
    }
}
