use chrono::NaiveDate;

use crate::errors::CoreError;
use crate::models::metrics::{
    BtcSummary, EquitySummary, FundingSummary, FundingTotal, SeriesStats, YDomain,
};
use crate::models::series::{project, BtcPoint, Dated, DatedValue, EquityPoint, FundingPoint};

// ═══════════════════════════════════════════════════════════════════
// Primitive derivations
//
// Every function here assumes its input is sorted ascending by date.
// Nothing re-sorts: callers own ordering. Use `ensure_ascending` at the
// boundary where untrusted data comes in.
// ═══════════════════════════════════════════════════════════════════

/// True when dates never decrease.
pub fn is_ascending<T: Dated>(points: &[T]) -> bool {
    points.windows(2).all(|w| w[0].date() <= w[1].date())
}

/// Reject a series whose dates go backwards.
pub fn ensure_ascending<T: Dated>(points: &[T]) -> Result<(), CoreError> {
    match points.windows(2).find(|w| w[0].date() > w[1].date()) {
        None => Ok(()),
        Some(w) => Err(CoreError::ValidationError(format!(
            "series is not in ascending date order ({} comes after {})",
            w[1].date(),
            w[0].date()
        ))),
    }
}

/// Running sum: `out[i] = values[0] + … + values[i]`.
pub fn cumulative(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Running sum keeping each point's date.
pub fn cumulative_series(points: &[DatedValue]) -> Vec<DatedValue> {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    points
        .iter()
        .zip(cumulative(&values))
        .map(|(p, total)| DatedValue::new(p.date, total))
        .collect()
}

/// `last - first`.
pub fn change(first: f64, last: f64) -> f64 {
    last - first
}

/// Percent change between endpoints. Defined as 0 when `first` is 0 so the
/// display never shows NaN or infinity.
pub fn percent_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        0.0
    } else {
        (last - first) / first * 100.0
    }
}

/// Day-over-day differences, each dated with the later point of its pair.
/// Fewer than two points yield an empty result.
pub fn per_day_deltas(points: &[DatedValue]) -> Vec<DatedValue> {
    points
        .windows(2)
        .map(|w| DatedValue::new(w[1].date, w[1].value - w[0].value))
        .collect()
}

/// Largest value; ties go to the earliest date.
pub fn best_day(deltas: &[DatedValue]) -> Option<DatedValue> {
    deltas.iter().copied().fold(None, |best, d| match best {
        Some(b) if b.value >= d.value => Some(b),
        _ => Some(d),
    })
}

/// Smallest value; ties go to the earliest date.
pub fn worst_day(deltas: &[DatedValue]) -> Option<DatedValue> {
    deltas.iter().copied().fold(None, |worst, d| match worst {
        Some(w) if w.value <= d.value => Some(w),
        _ => Some(d),
    })
}

/// Arithmetic mean of the deltas, 0 when there are none.
pub fn average_daily_change(deltas: &[DatedValue]) -> f64 {
    if deltas.is_empty() {
        0.0
    } else {
        deltas.iter().map(|d| d.value).sum::<f64>() / deltas.len() as f64
    }
}

/// Padded chart bounds: `[min - pad, max + pad]` with
/// `pad = max(10% of the range, 10% of |max|)`.
///
/// An all-zero series would give a zero pad; a unit pad is used instead so
/// the domain always has width.
pub fn y_domain(values: &[f64]) -> Option<YDomain> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })?;

    let pad = f64::max(0.1 * (max - min), 0.1 * max.abs());
    let pad = if pad > 0.0 { pad } else { 1.0 };
    Some(YDomain {
        min: min - pad,
        max: max + pad,
    })
}

/// Whole days between two dates, never less than 1 (used as a divisor).
pub fn days_in_range(first: NaiveDate, last: NaiveDate) -> i64 {
    (last - first).num_days().max(1)
}

/// Largest peak-to-trough decline, in percent of the peak. 0 for a curve that
/// never falls or never rises above zero.
pub fn max_drawdown_pct(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak * 100.0);
        }
    }
    worst
}

/// Estimated average BTC entry price.
///
/// HEURISTIC, not accounting: uses the first day's `value_usd / amount_btc`
/// when the first day held BTC, otherwise the latest day's ratio. It does not
/// look at trade fills, so accumulation at different prices after the first
/// day is not reflected.
pub fn estimate_entry_price(points: &[BtcPoint]) -> Option<f64> {
    let first = points.first()?;
    first
        .implied_price()
        .or_else(|| points.last().and_then(BtcPoint::implied_price))
}

/// Endpoint, per-day and range statistics for a level series.
/// `None` for an empty series.
pub fn series_stats(points: &[DatedValue]) -> Option<SeriesStats> {
    let first = points.first()?;
    let last = points.last()?;
    let deltas = per_day_deltas(points);
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();

    Some(SeriesStats {
        first: first.value,
        last: last.value,
        change: change(first.value, last.value),
        percent_change: percent_change(first.value, last.value),
        best_day: best_day(&deltas),
        worst_day: worst_day(&deltas),
        average_daily_change: average_daily_change(&deltas),
        days: days_in_range(first.date, last.date),
        domain: y_domain(&values),
    })
}

// ═══════════════════════════════════════════════════════════════════
// Composite summaries
// ═══════════════════════════════════════════════════════════════════

/// Turns raw daily series into the summaries the dashboard displays.
///
/// Pure — no I/O. Empty input means "no data" and yields `None`.
pub struct SeriesService;

impl SeriesService {
    pub fn new() -> Self {
        Self
    }

    pub fn equity_summary(&self, points: &[EquityPoint]) -> Option<EquitySummary> {
        let usd = project(points, |p| p.equity_usd);
        let btc = project(points, |p| p.equity_btc);
        let usd_values: Vec<f64> = usd.iter().map(|p| p.value).collect();

        Some(EquitySummary {
            start_date: points.first()?.date,
            end_date: points.last()?.date,
            usd: series_stats(&usd)?,
            btc: series_stats(&btc)?,
            max_drawdown_pct: max_drawdown_pct(&usd_values),
        })
    }

    /// Best/worst day and the average change follow the other series: they
    /// are day-over-day deltas of the daily net. The extremes of the daily
    /// flows themselves are reported as the best/worst funding day.
    pub fn funding_summary(
        &self,
        points: &[FundingPoint],
        period_total: Option<FundingTotal>,
    ) -> Option<FundingSummary> {
        let first = points.first()?;
        let last = points.last()?;
        let daily_net = project(points, FundingPoint::net);
        let deltas = per_day_deltas(&daily_net);
        let total_paid: f64 = points.iter().map(|p| p.paid).sum();
        let total_received: f64 = points.iter().map(|p| p.received).sum();

        Some(FundingSummary {
            cumulative: cumulative_series(&daily_net),
            total_paid,
            total_received,
            net: total_received - total_paid,
            best_day: best_day(&deltas),
            worst_day: worst_day(&deltas),
            average_daily_change: average_daily_change(&deltas),
            best_funding_day: best_day(&daily_net),
            worst_funding_day: worst_day(&daily_net),
            average_daily_funding: average_daily_change(&daily_net),
            days: days_in_range(first.date, last.date),
            period_total,
        })
    }

    pub fn btc_summary(&self, points: &[BtcPoint]) -> Option<BtcSummary> {
        let last = points.last()?;
        let holdings = project(points, |p| p.amount_btc);

        Some(BtcSummary {
            stats: series_stats(&holdings)?,
            current_value_usd: last.value_usd,
            estimated_entry_price: estimate_entry_price(points),
            current_price: last.implied_price(),
        })
    }
}

impl Default for SeriesService {
    fn default() -> Self {
        Self::new()
    }
}
