//! Unit tests for the Money module
//!
//! Covers creation, signed arithmetic, proration rounding and
//! currency handling.

use core_kernel::{Currency, Money, MoneyError};
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_creates_money_with_correct_amount() {
        let money = Money::new(dec!(29.95), Currency::USD);
        assert_eq!(money.amount(), dec!(29.95));
        assert_eq!(money.currency(), Currency::USD);
    }

    #[test]
    fn test_new_rounds_to_four_decimal_places() {
        let money = Money::new(dec!(1.234567), Currency::USD);
        assert_eq!(money.amount(), dec!(1.2346));
    }

    #[test]
    fn test_from_minor_converts_cents() {
        let money = Money::from_minor(2995, Currency::USD);
        assert_eq!(money.amount(), dec!(29.95));
    }

    #[test]
    fn test_from_minor_handles_jpy_no_decimals() {
        let money = Money::from_minor(500, Currency::JPY);
        assert_eq!(money.amount(), dec!(500));
    }

    #[test]
    fn test_negative_amounts_are_allowed() {
        let money = Money::new(dec!(-16.42), Currency::USD);
        assert!(money.is_negative());
        assert_eq!(money.abs().amount(), dec!(16.42));
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_checked_add_currency_mismatch() {
        let usd = Money::new(dec!(1), Currency::USD);
        let eur = Money::new(dec!(1), Currency::EUR);
        assert!(matches!(usd.checked_add(&eur), Err(MoneyError::CurrencyMismatch(_, _))));
    }

    #[test]
    fn test_checked_sub_can_go_negative() {
        let a = Money::new(dec!(29.95), Currency::USD);
        let b = Money::new(dec!(249.95), Currency::USD);
        assert_eq!(a.checked_sub(&b).unwrap().amount(), dec!(-220.00));
    }

    #[test]
    fn test_negation_reverses_a_charge() {
        let charge = Money::new(dec!(137.07), Currency::USD);
        assert_eq!((-charge).amount(), dec!(-137.07));
        assert!(charge.checked_add(&-charge).unwrap().is_zero());
    }

    #[test]
    fn test_min_picks_smaller_amount() {
        let credit = Money::new(dec!(100), Currency::USD);
        let balance = Money::new(dec!(30.95), Currency::USD);
        assert_eq!(credit.min(&balance).unwrap(), balance);
    }

    #[test]
    fn test_min_rejects_currency_mismatch() {
        let usd = Money::new(dec!(1), Currency::USD);
        let gbp = Money::new(dec!(1), Currency::GBP);
        assert!(usd.min(&gbp).is_err());
    }

    #[test]
    fn test_sum_of_signed_items() {
        let items = [
            Money::new(dec!(249.95), Currency::USD),
            Money::new(dec!(-29.95), Currency::USD),
            Money::new(dec!(1), Currency::USD),
        ];
        assert_eq!(Money::sum(Currency::USD, items.iter()).unwrap().amount(), dec!(221.00));
    }

    #[test]
    fn test_sum_of_nothing_is_zero() {
        assert!(Money::sum(Currency::EUR, std::iter::empty()).unwrap().is_zero());
    }

    #[test]
    fn test_sum_fails_on_mixed_currencies() {
        let items = [Money::new(dec!(1), Currency::USD), Money::new(dec!(1), Currency::CAD)];
        assert!(Money::sum(Currency::USD, items.iter()).is_err());
    }
}

mod proration {
    use super::*;

    #[test]
    fn test_full_period_is_exact() {
        let price = Money::new(dec!(29.95), Currency::USD);
        assert_eq!(price.prorate(31, 31).unwrap(), price);
    }

    #[test]
    fn test_partial_month_rounds_half_away_from_zero() {
        // 14 of 31 days of 29.95 = 13.5258...
        let price = Money::new(dec!(29.95), Currency::USD);
        assert_eq!(price.prorate(14, 31).unwrap().amount(), dec!(13.53));
    }

    #[test]
    fn test_zero_denominator_is_rejected() {
        let price = Money::new(dec!(10), Currency::USD);
        assert_eq!(price.prorate(1, 0), Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn test_negative_ratio_is_rejected() {
        let price = Money::new(dec!(10), Currency::USD);
        assert!(matches!(price.prorate(-1, 30), Err(MoneyError::InvalidAmount(_))));
    }

    #[test]
    fn test_jpy_rounds_to_whole_units() {
        let price = Money::new(dec!(1000), Currency::JPY);
        assert_eq!(price.prorate(1, 3).unwrap().amount(), dec!(333));
    }
}

mod currency {
    use super::*;

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::USD.decimal_places(), 2);
        assert_eq!(Currency::JPY.decimal_places(), 0);
    }

    #[test]
    fn test_currency_display_is_code() {
        assert_eq!(Currency::BRL.to_string(), "BRL");
    }

    #[test]
    fn test_money_display_uses_symbol_and_minor_units() {
        assert_eq!(Money::new(dec!(33.9), Currency::USD).to_string(), "$ 33.90");
    }
}

mod serialization {
    use super::*;

    #[test]
    fn test_money_json_shape() {
        let money = Money::new(dec!(12.45), Currency::USD);
        let json = serde_json::to_value(money).unwrap();
        assert_eq!(json["currency"], "USD");

        let back: Money = serde_json::from_value(json).unwrap();
        assert_eq!(back, money);
    }
}
