//! Property tests for the money type and the payment status machine.

use proptest::prelude::*;
use rust_decimal::Decimal;

use paybridge::domain::foundation::{Currency, Money, StateMachine};
use paybridge::domain::payment::PaymentStatus;

const ALL_STATUSES: [PaymentStatus; 6] = [
    PaymentStatus::Pending,
    PaymentStatus::Processing,
    PaymentStatus::Succeeded,
    PaymentStatus::Failed,
    PaymentStatus::PartiallyRefunded,
    PaymentStatus::Refunded,
];

fn status_strategy() -> impl Strategy<Value = PaymentStatus> {
    prop::sample::select(&ALL_STATUSES[..])
}

proptest! {
    /// Minor-unit conversion matches the decimal amount exactly for any
    /// amount expressible in the currency's minor unit.
    #[test]
    fn minor_units_are_exact_for_cent_amounts(cents in -1_000_000_000i64..1_000_000_000i64) {
        let usd = Currency::new("USD").unwrap();
        let money = Money::from_minor_units(cents, usd);
        prop_assert_eq!(money.to_minor_units(), cents);
        prop_assert_eq!(money.amount, Decimal::new(cents, 2));
    }

    /// Zero-decimal currencies carry the amount as-is on the wire.
    #[test]
    fn zero_decimal_currency_sends_major_units(units in 0i64..1_000_000_000i64) {
        let jpy = Currency::new("JPY").unwrap();
        let money = Money::from_minor_units(units, jpy);
        prop_assert_eq!(money.to_minor_units(), units);
        prop_assert_eq!(money.amount, Decimal::from(units));
    }

    /// Addition and subtraction are exact inverses, with no float drift.
    #[test]
    fn add_then_sub_is_identity(a in -10_000_000i64..10_000_000i64,
                                b in -10_000_000i64..10_000_000i64) {
        let usd = Currency::new("USD").unwrap();
        let x = Money::from_minor_units(a, usd);
        let y = Money::from_minor_units(b, usd);
        let round_trip = x.checked_add(&y).unwrap().checked_sub(&y).unwrap();
        prop_assert_eq!(round_trip, x);
    }

    /// Whatever sequence of provider notifications arrives, applying
    /// them through the state machine never decreases the status rank.
    #[test]
    fn applied_transitions_never_decrease_rank(
        targets in prop::collection::vec(status_strategy(), 1..20)
    ) {
        let mut status = PaymentStatus::Pending;
        for target in targets {
            let before = status.rank();
            if let Ok(next) = status.transition_to(target) {
                prop_assert!(
                    next.rank() > before
                        || (status == PaymentStatus::PartiallyRefunded
                            && next == PaymentStatus::PartiallyRefunded),
                    "transition {:?} -> {:?} decreased rank", status, next
                );
                status = next;
            }
        }
    }

    /// Terminal statuses admit no transition at all.
    #[test]
    fn terminal_statuses_reject_everything(target in status_strategy()) {
        for terminal in [PaymentStatus::Failed, PaymentStatus::Refunded] {
            prop_assert!(terminal.transition_to(target).is_err());
        }
    }
}
