//! Account settings that shape billing: bill cycle day, timezone, day-count
//! convention and currency, plus credit consumption properties

use std::future::Future;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal_macros::dec;

use core_kernel::{Currency, DayCountConvention, InvoiceItemId, Timezone};
use domain_invoice::{DryRunMode, InvoiceItemKind};
use test_utils::{
    assert_invoice_amount, assert_invoice_items, assert_money_zero, bill_cycle_day_strategy, day_2012_strategy,
    usd_price_strategy, DateFixtures, ExpectedItem, MoneyFixtures, PlanFixtures, TestAccountBuilder, TestHarness,
};

fn day(month: u32, day: u32) -> NaiveDate {
    DateFixtures::day(month, day)
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Account settings
// ============================================================================

mod account_settings_tests {
    use super::*;

    #[tokio::test]
    async fn test_account_bill_cycle_day_prorates_first_slice() {
        let account = TestAccountBuilder::new().with_bill_cycle_day(15).build();
        let harness = TestHarness::with_account(account, day(4, 1)).await;
        let account_id = harness.account_id();
        let pistol = harness.subscription();
        harness
            .record([pistol.create(day(4, 1), PlanFixtures::pistol_evergreen())])
            .await;

        let first = harness
            .engine
            .generate(account_id, day(4, 1), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();
        // 14 of the 31 days between March 15th and April 15th
        assert_invoice_items(
            &first,
            &[ExpectedItem::new(day(4, 1), Some(day(4, 15)), InvoiceItemKind::Recurring, dec!(13.53))],
        );

        harness.clock.set_day(day(4, 15));
        let second = harness
            .engine
            .generate(account_id, day(4, 15), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();
        assert_invoice_items(
            &second,
            &[ExpectedItem::new(day(4, 15), Some(day(5, 15)), InvoiceItemKind::Recurring, dec!(29.95))],
        );
    }

    #[tokio::test]
    async fn test_invoice_date_is_taken_in_account_timezone() {
        let account = TestAccountBuilder::new()
            .with_timezone(Timezone::new(chrono_tz::America::Los_Angeles))
            .build();
        // midnight UTC on May 1st is still April 30th in Los Angeles
        let harness = TestHarness::with_account(account, day(5, 1)).await;
        let pistol = harness.subscription();
        harness
            .record([pistol.create(day(4, 30), PlanFixtures::pistol_evergreen())])
            .await;

        let invoice = harness
            .engine
            .generate(harness.account_id(), day(4, 30), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();

        assert_eq!(invoice.invoice_date, day(4, 30));
        assert_invoice_items(
            &invoice,
            &[ExpectedItem::new(day(4, 30), Some(day(5, 30)), InvoiceItemKind::Recurring, dec!(29.95))],
        );
    }

    #[tokio::test]
    async fn test_thirty_360_proration() {
        let account = TestAccountBuilder::new()
            .with_bill_cycle_day(1)
            .with_day_count(DayCountConvention::Thirty360)
            .build();
        let harness = TestHarness::with_account(account, day(5, 16)).await;
        let pistol = harness.subscription();
        harness
            .record([pistol.create(day(5, 16), PlanFixtures::pistol_evergreen())])
            .await;

        let invoice = harness
            .engine
            .generate(harness.account_id(), day(5, 16), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();

        // 15 of 30 days; actual days would give 16/31
        assert_invoice_amount(&invoice, dec!(14.98));
    }

    #[tokio::test]
    async fn test_catalog_in_other_currency_rejects_subscription() {
        let account = TestAccountBuilder::new().with_currency(Currency::EUR).build();
        let harness = TestHarness::with_account(account, day(5, 1)).await;
        let pistol = harness.subscription();
        harness
            .record([pistol.create(day(5, 1), PlanFixtures::pistol_evergreen())])
            .await;

        let outcome = harness
            .engine
            .generate(harness.account_id(), day(5, 1), DryRunMode::None)
            .await
            .unwrap();

        assert!(outcome.invoice.is_none());
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].subscription_id, pistol.subscription_id);
        assert!(harness.tax.calls().is_empty());
    }
}

// ============================================================================
// Tax plugin scripting
// ============================================================================

mod tax_plugin_tests {
    use super::*;

    async fn trial_invoiced(harness: &TestHarness) -> test_utils::TestSubscription {
        let pistol = harness.subscription();
        harness
            .record([
                pistol.create(DateFixtures::start(), PlanFixtures::pistol_trial()),
                pistol.phase(DateFixtures::trial_end(), PlanFixtures::pistol_evergreen()),
            ])
            .await;
        harness
            .engine
            .generate(harness.account_id(), DateFixtures::start(), DryRunMode::None)
            .await
            .unwrap();
        harness.clock.set_day(DateFixtures::trial_end());
        pistol
    }

    #[tokio::test]
    async fn test_bundle_tax_item_lands_on_bundle() {
        let harness = TestHarness::start(DateFixtures::start()).await;
        let pistol = trial_invoiced(&harness).await;

        let tax_id = InvoiceItemId::new();
        harness
            .tax
            .add_bundle_tax_item(tax_id, pistol.bundle_id, DateFixtures::trial_end(), MoneyFixtures::usd_tax());
        let invoice = harness
            .engine
            .generate(harness.account_id(), DateFixtures::trial_end(), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();

        let tax = invoice.item(tax_id).expect("tax item on invoice");
        assert_eq!(tax.kind, InvoiceItemKind::Tax);
        assert_eq!(tax.bundle_id, Some(pistol.bundle_id));
        assert_eq!(invoice.bundle_ids(), vec![pistol.bundle_id]);
        assert_invoice_amount(&invoice, dec!(30.95));
    }

    #[tokio::test]
    async fn test_reset_drops_queued_tax() {
        let harness = TestHarness::start(DateFixtures::start()).await;
        trial_invoiced(&harness).await;

        harness
            .tax
            .add_tax_item(InvoiceItemId::new(), DateFixtures::trial_end(), MoneyFixtures::usd_tax());
        harness.tax.reset();
        let invoice = harness
            .engine
            .generate(harness.account_id(), DateFixtures::trial_end(), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();

        assert_eq!(invoice.items_of(InvoiceItemKind::Tax).count(), 0);
        assert_eq!(harness.tax.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_covers_whole_invoice() {
        let harness = TestHarness::start(day(5, 1)).await;
        let account_id = harness.account_id();
        harness
            .engine
            .insert_credit(account_id, MoneyFixtures::usd(dec!(100)), day(5, 1))
            .await
            .unwrap();
        let pistol = harness.subscription();
        harness
            .record([pistol.create(day(5, 1), PlanFixtures::pistol_evergreen())])
            .await;

        let invoice = harness
            .engine
            .generate(account_id, day(5, 1), DryRunMode::None)
            .await
            .unwrap()
            .invoice
            .unwrap();

        assert_money_zero(&invoice.balance().unwrap());
        assert_eq!(invoice.cba_amount().unwrap(), MoneyFixtures::usd(dec!(-29.95)));
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_recurring_slices_are_contiguous(
        bill_cycle_day in bill_cycle_day_strategy(),
        start in day_2012_strategy(),
        horizon_days in 0i64..120i64,
    ) {
        block_on(async {
            let account = TestAccountBuilder::new().with_bill_cycle_day(bill_cycle_day).build();
            let harness = TestHarness::with_account(account, start).await;
            let pistol = harness.subscription();
            harness
                .record([pistol.create(start, PlanFixtures::pistol_evergreen())])
                .await;

            let target = start + Duration::days(horizon_days);
            let invoice = harness
                .engine
                .generate(harness.account_id(), target, DryRunMode::None)
                .await
                .unwrap()
                .invoice
                .expect("evergreen subscription is always due");

            let mut slices: Vec<_> = invoice.items_of(InvoiceItemKind::Recurring).collect();
            slices.sort_by_key(|item| item.period.start);
            let full = MoneyFixtures::usd(dec!(29.95));

            assert_eq!(slices[0].period.start, start);
            for pair in slices.windows(2) {
                assert_eq!(pair[0].period.end, Some(pair[1].period.start));
                assert_eq!(pair[1].amount, full);
            }
            let last = slices[slices.len() - 1];
            assert!(last.period.start <= target);
            assert!(last.period.end.unwrap() > target);
            assert!(slices.iter().all(|item| item.amount.is_positive() && item.amount.amount() <= full.amount()));
        });
    }

    #[test]
    fn prop_credit_consumed_up_to_invoice_balance(credit in usd_price_strategy()) {
        block_on(async {
            let harness = TestHarness::start(day(5, 1)).await;
            let account_id = harness.account_id();
            harness.engine.insert_credit(account_id, credit, day(5, 1)).await.unwrap();
            let pistol = harness.subscription();
            harness
                .record([pistol.create(day(5, 1), PlanFixtures::pistol_evergreen())])
                .await;

            let invoice = harness
                .engine
                .generate(account_id, day(5, 1), DryRunMode::None)
                .await
                .unwrap()
                .invoice
                .unwrap();

            let charge = MoneyFixtures::usd(dec!(29.95));
            let used = credit.min(&charge).unwrap();
            assert_eq!(invoice.cba_amount().unwrap(), -used);
            let owed = charge.checked_sub(&used).unwrap();
            assert_eq!(invoice.balance().unwrap(), owed);

            let timeline = harness.engine.account_timeline(account_id).await.unwrap();
            assert_eq!(timeline.account_credit, credit.checked_sub(&used).unwrap());
            assert_eq!(timeline.account_balance, owed);
        });
    }
}
