//! Escrow charge calculation
//!
//! Computes the platform's cut from a business fee schedule and a monetary
//! total. Schedules come from the business service as string-typed
//! numerics; malformed fields behave as 0 rather than failing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places for user-facing charge quotes.
pub const QUOTE_SCALE: u32 = 4;

/// One breakpoint tier of a fee schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeTier {
    pub amount: String,
    pub charge: String,
}

impl ChargeTier {
    pub fn new(amount: impl Into<String>, charge: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            charge: charge.into(),
        }
    }

    fn parsed(&self) -> Option<(Decimal, Decimal)> {
        Some((parse_num(&self.amount)?, parse_num(&self.charge)?))
    }
}

/// Business fee schedule: either three breakpoint tiers, or a flat
/// percentage pair plus a fixed processing fee. Tiers take precedence
/// when all three are populated with numeric amount/charge pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessCharge {
    pub business_id: String,
    pub currency: String,
    /// Business percentage of the flat formula.
    pub business_charge: String,
    /// Platform percentage of the flat formula.
    pub platform_charge: String,
    pub processing_fee: String,
    pub min: Option<ChargeTier>,
    pub mid: Option<ChargeTier>,
    pub max: Option<ChargeTier>,
}

fn parse_num(s: &str) -> Option<Decimal> {
    s.trim().parse::<Decimal>().ok()
}

fn parse_or_zero(s: &str) -> Decimal {
    parse_num(s).unwrap_or(Decimal::ZERO)
}

/// Compute the escrow charge for `total` under `schedule`.
///
/// Tier branches are checked in declared order and the first match wins:
/// the min and mid conditions both hold at `total == min.amount`, so that
/// total lands in the min tier.
///
/// # Example
/// ```
/// use escrowd::charge::{BusinessCharge, ChargeTier, compute_charge};
/// use rust_decimal::Decimal;
///
/// let schedule = BusinessCharge {
///     min: Some(ChargeTier::new("100", "5")),
///     mid: Some(ChargeTier::new("1000", "20")),
///     max: Some(ChargeTier::new("10000", "50")),
///     ..Default::default()
/// };
/// assert_eq!(compute_charge(&schedule, Decimal::from(500)), Decimal::from(20));
/// ```
pub fn compute_charge(schedule: &BusinessCharge, total: Decimal) -> Decimal {
    if let Some(((min_amount, min_charge), (mid_amount, mid_charge), (_, max_charge))) = tiers(schedule)
    {
        if total <= min_amount {
            return min_charge;
        }
        if total >= min_amount && total <= mid_amount {
            return mid_charge;
        }
        return max_charge;
    }

    let pct = parse_or_zero(&schedule.business_charge) + parse_or_zero(&schedule.platform_charge);
    total * pct / Decimal::ONE_HUNDRED + parse_or_zero(&schedule.processing_fee)
}

/// Charge rounded for the user-facing quote surface. Internal consumers
/// use [`compute_charge`] unrounded.
pub fn quote_charge(schedule: &BusinessCharge, total: Decimal) -> Decimal {
    compute_charge(schedule, total).round_dp(QUOTE_SCALE)
}

type Tier = (Decimal, Decimal);

fn tiers(schedule: &BusinessCharge) -> Option<(Tier, Tier, Tier)> {
    Some((
        schedule.min.as_ref()?.parsed()?,
        schedule.mid.as_ref()?.parsed()?,
        schedule.max.as_ref()?.parsed()?,
    ))
}
