//! Subscription plans and billing period arithmetic.
//!
//! Plans live in an external catalog (see `ports::PlanCatalog`); this
//! module defines the shape the catalog returns and the calendar-aware
//! period computation.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Money, PlanId, Timestamp};

/// Billing interval unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

/// A subscription plan as resolved from the plan catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,

    /// Provider-specific price/plan identifier (e.g. a Stripe price id).
    pub provider_price_id: String,

    pub interval: BillingInterval,

    /// Number of intervals per billing period (e.g. 3 months).
    pub interval_count: u32,

    /// Amount charged per billing period.
    pub unit_amount: Money,
}

impl SubscriptionPlan {
    /// Computes the end of a billing period starting at `start`.
    ///
    /// Uses calendar-aware month/year addition: a monthly plan started on
    /// Jan 31 ends on Feb 28/29, never March. The resulting interval is
    /// half-open, end exclusive.
    pub fn period_end_from(&self, start: Timestamp) -> Timestamp {
        match self.interval {
            BillingInterval::Month => start.add_months(self.interval_count),
            BillingInterval::Year => start.add_years(self.interval_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Currency;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn plan(interval: BillingInterval, count: u32) -> SubscriptionPlan {
        SubscriptionPlan {
            id: PlanId::new(),
            provider_price_id: "price_test".to_string(),
            interval,
            interval_count: count,
            unit_amount: Money::positive(dec!(19.99), Currency::new("USD").unwrap()).unwrap(),
        }
    }

    fn ts(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap())
    }

    #[test]
    fn monthly_period_from_jan_31_ends_in_feb() {
        let p = plan(BillingInterval::Month, 1);
        assert_eq!(p.period_end_from(ts(2025, 1, 31)), ts(2025, 2, 28));
        assert_eq!(p.period_end_from(ts(2024, 1, 31)), ts(2024, 2, 29));
    }

    #[test]
    fn quarterly_period_spans_three_months() {
        let p = plan(BillingInterval::Month, 3);
        assert_eq!(p.period_end_from(ts(2025, 1, 15)), ts(2025, 4, 15));
    }

    #[test]
    fn yearly_period_handles_leap_day() {
        let p = plan(BillingInterval::Year, 1);
        assert_eq!(p.period_end_from(ts(2024, 2, 29)), ts(2025, 2, 28));
    }

    #[test]
    fn period_end_is_strictly_after_start() {
        for p in [plan(BillingInterval::Month, 1), plan(BillingInterval::Year, 2)] {
            let start = ts(2025, 8, 31);
            assert!(p.period_end_from(start).is_after(&start));
        }
    }
}
