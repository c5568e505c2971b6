//! End-to-end scenarios against the public engine API

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tokio_test::{assert_err, assert_ok};

use wallet_engine::analytics::DateRange;
use wallet_engine::clock::{Clock, ManualClock};
use wallet_engine::config::Config;
use wallet_engine::external::{
    InMemoryKyc, KycStatus, LocalGateway, PayoutMethod, SettlementOutcome,
};
use wallet_engine::investment::InvestmentStatus;
use wallet_engine::ledger::{Category, WalletKind};
use wallet_engine::processor::{RequestStatus, TransferForm, TransferTarget, WithdrawalForm, WithdrawalKind};
use wallet_engine::settings::InMemorySettings;
use wallet_engine::shop::{NewShop, Shop};
use wallet_engine::{Collaborators, Engine, Error, TransactionFilter};

struct Harness {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    settings: Arc<InMemorySettings>,
    kyc: Arc<InMemoryKyc>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::at_date(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    ));
    let settings = Arc::new(InMemorySettings::default());
    let kyc = Arc::new(InMemoryKyc::new());
    for user in ["alice", "bob", "carol"] {
        kyc.set_status(user, KycStatus::Approved);
    }

    let mut config = Config::default();
    config.payout.retry_base_delay_ms = 1;

    let engine = Engine::new(
        &config,
        Collaborators {
            settings: settings.clone(),
            kyc: kyc.clone(),
            gateway: Arc::new(LocalGateway::new()),
            clock: clock.clone(),
        },
    );

    Harness {
        engine: Arc::new(engine),
        clock,
        settings,
        kyc,
    }
}

async fn shop(h: &Harness, slots: u32, days: u32) -> Shop {
    h.engine
        .create_shop(NewShop {
            name: "Fruit Market".to_string(),
            daily_percent_bps: Some(200),
            duration_days: days,
            min_amount: 1_000,
            max_amount: 1_000_000,
            total_slots: slots,
        })
        .await
        .unwrap()
}

async fn deposit(h: &Harness, user: &str, amount: u64) {
    let intent = h.engine.initiate_deposit(user, amount).await.unwrap();
    h.engine
        .on_deposit_settled(&intent.intent_id, SettlementOutcome::Succeeded)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_on_last_slot_have_one_winner() {
    let h = harness();
    let shop = shop(&h, 1, 10).await;
    deposit(&h, "alice", 10_000).await;
    deposit(&h, "bob", 10_000).await;

    let tasks: Vec<_> = ["alice", "bob"]
        .into_iter()
        .map(|user| {
            let engine = Arc::clone(&h.engine);
            let shop_id = shop.id;
            tokio::spawn(async move { engine.open_investment(user, &shop_id, 10_000).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::CapacityExceeded { .. }))));

    let shop = h.engine.get_shop(&shop.id).await.unwrap();
    assert_eq!(shop.filled_slots, 1);

    // The loser's money never moved
    let a = h.engine.get_wallet_balances("alice").await.unwrap();
    let b = h.engine.get_wallet_balances("bob").await.unwrap();
    assert_eq!(a.main + b.main, 10_000);
    assert_eq!(a.investment + b.investment, 10_000);
}

#[tokio::test]
async fn capital_eligibility_boundary() {
    let h = harness();
    let shop = shop(&h, 5, 30).await;
    deposit(&h, "alice", 100_000).await;
    let inv = h.engine.open_investment("alice", &shop.id, 100_000).await.unwrap();
    let kind = WithdrawalKind::Capital {
        investment_id: inv.id,
    };

    // endDate = today + 1
    h.clock.advance_days(29);
    assert_eq!(h.clock.today() + Duration::days(1), inv.end_date);
    let err = h
        .engine
        .request_withdrawal("alice", kind, 100_000, PayoutMethod::Bank)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotEligible(_)));
    assert!(!h.engine.is_capital_eligible(&inv.id).await.unwrap());

    // endDate = today
    h.clock.advance_days(1);
    h.engine.maturity_check().await.unwrap();
    assert!(h.engine.is_capital_eligible(&inv.id).await.unwrap());
    let request = assert_ok!(
        h.engine
            .request_withdrawal("alice", kind, 100_000, PayoutMethod::Bank)
            .await
    );
    assert_eq!((request.fee, request.net_amount), (1_000, 99_000));

    h.engine.approve_withdrawal(&request.id).await.unwrap();
    h.engine
        .on_settlement_callback(&request.id, SettlementOutcome::Succeeded)
        .await
        .unwrap();

    let inv = h.engine.get_investment(&inv.id).await.unwrap();
    assert_eq!(inv.status, InvestmentStatus::CapitalWithdrawn);
    assert_eq!(inv.accrued_profit, 2_000 * 30);

    // Already withdrawn
    let err = h
        .engine
        .request_withdrawal("alice", kind, 100_000, PayoutMethod::Bank)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotEligible(_)));
}

#[tokio::test]
async fn accrue_day_twice_writes_one_entry() {
    let h = harness();
    let shop = shop(&h, 5, 10).await;
    deposit(&h, "alice", 50_000).await;
    let inv = h.engine.open_investment("alice", &shop.id, 50_000).await.unwrap();

    h.clock.advance_days(1);
    let day_one = inv.start_date + Duration::days(1);
    assert_eq!(h.engine.accrue_day(&inv.id, day_one).await.unwrap().len(), 1);
    assert!(h.engine.accrue_day(&inv.id, day_one).await.unwrap().is_empty());

    let income = h.engine.list_transactions(
        "alice",
        &TransactionFilter {
            category: Some(Category::Income),
            ..Default::default()
        },
    );
    assert_eq!(income.len(), 1);
    assert_eq!(income[0].amount, 1_000);

    // A later daily run only adds the remaining elapsed days
    h.clock.advance_days(2);
    let report = h.engine.run_daily().await.unwrap();
    assert_eq!(report.days_accrued, 2);
    assert_eq!(
        h.engine.get_wallet_balances("alice").await.unwrap().profit,
        3_000
    );
}

#[tokio::test]
async fn fee_quotes_floor() {
    let h = harness();
    let q = h.engine.quote_withdrawal(10_000).await.unwrap();
    assert_eq!((q.fee, q.net), (100, 9_900));
    let q = h.engine.quote_withdrawal(999).await.unwrap();
    assert_eq!((q.fee, q.net), (9, 990));
    let q = h.engine.quote_transfer(10_000).await.unwrap();
    assert_eq!((q.fee, q.net), (50, 9_950));
}

#[tokio::test]
async fn rejected_withdrawal_restores_exact_balance() {
    let h = harness();
    let shop = shop(&h, 5, 10).await;
    deposit(&h, "alice", 80_000).await;
    h.engine.open_investment("alice", &shop.id, 80_000).await.unwrap();
    h.clock.advance_days(10);
    h.engine.run_daily().await.unwrap();

    let before = h.engine.get_wallet_balances("alice").await.unwrap();
    assert_eq!(before.profit, 16_000);

    let request = h
        .engine
        .request_withdrawal("alice", WithdrawalKind::Profit, 10_000, PayoutMethod::VelvPay)
        .await
        .unwrap();
    assert_eq!(
        h.engine.get_wallet_balances("alice").await.unwrap().profit,
        6_000
    );

    let rejected = h
        .engine
        .reject_withdrawal(&request.id, "documents expired")
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(h.engine.get_wallet_balances("alice").await.unwrap(), before);
    assert!(h.engine.reconcile("alice").await.unwrap().is_empty());

    // Contributes nothing to withdrawal analytics
    let totals = h.engine.totals_by_category("alice", DateRange::all());
    assert_eq!(totals[&Category::Withdrawal], 0);
}

#[tokio::test]
async fn maintenance_blocks_every_request() {
    let h = harness();
    deposit(&h, "alice", 500_000).await;
    h.engine
        .admin_credit("alice", WalletKind::Profit, 500_000)
        .await
        .unwrap();
    h.settings.set_maintenance_mode(true).await.unwrap();

    let profit = h
        .engine
        .request_withdrawal("alice", WithdrawalKind::Profit, 5_000, PayoutMethod::Bank)
        .await;
    assert!(matches!(profit, Err(Error::SystemUnavailable)));

    let wallet = h
        .engine
        .request_transfer(
            "alice",
            TransferTarget::Wallet {
                from: WalletKind::Profit,
                to: WalletKind::Main,
            },
            5_000,
        )
        .await;
    assert!(matches!(wallet, Err(Error::SystemUnavailable)));

    let user = h
        .engine
        .request_transfer(
            "alice",
            TransferTarget::User {
                to_user: "bob".to_string(),
            },
            5_000,
        )
        .await;
    assert!(matches!(user, Err(Error::SystemUnavailable)));

    // Takes effect immediately once lifted
    h.settings.set_maintenance_mode(false).await.unwrap();
    let request = h
        .engine
        .request_withdrawal("alice", WithdrawalKind::Profit, 5_000, PayoutMethod::Bank)
        .await
        .unwrap();
    assert_eq!(request.settings.version, 3);
}

#[tokio::test]
async fn kyc_gate_applies_to_sender() {
    let h = harness();
    deposit(&h, "dave", 50_000).await;
    h.kyc.set_status("dave", KycStatus::Pending);

    let err = h
        .engine
        .request_transfer(
            "dave",
            TransferTarget::User {
                to_user: "alice".to_string(),
            },
            5_000,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KycRequired(_)));
}

#[tokio::test]
async fn net_flow_matches_fixture() {
    let h = harness();
    let shop = shop(&h, 5, 5).await;

    deposit(&h, "alice", 60_000).await;
    deposit(&h, "alice", 40_000).await;
    h.engine.open_investment("alice", &shop.id, 50_000).await.unwrap();
    h.clock.advance_days(5);
    h.engine.run_daily().await.unwrap();

    let request = h
        .engine
        .request_withdrawal("alice", WithdrawalKind::Profit, 4_000, PayoutMethod::Bank)
        .await
        .unwrap();
    h.engine.approve_withdrawal(&request.id).await.unwrap();
    h.engine
        .on_settlement_callback(&request.id, SettlementOutcome::Succeeded)
        .await
        .unwrap();

    let transfer = h
        .engine
        .submit_transfer_form(
            "alice",
            TransferForm {
                amount: "2000".to_string(),
                to_user: Some("bob".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.engine.approve_transfer(&transfer.id).await.unwrap();

    // Pending deposit is excluded
    h.engine.initiate_deposit("alice", 7_777).await.unwrap();

    let summary = h.engine.get_analytics_summary("alice", DateRange::all());
    let deposits = 60_000 + 40_000;
    let income = 1_000 * 5;
    let withdrawals = 4_000;
    let investments = 50_000;
    assert_eq!(summary.totals[&Category::Deposit], deposits);
    assert_eq!(summary.totals[&Category::Income], income);
    assert_eq!(summary.totals[&Category::Withdrawal], withdrawals);
    assert_eq!(summary.totals[&Category::Investment], investments);
    assert_eq!(summary.totals[&Category::Transfer], 2_000);
    assert_eq!(summary.net_flow, deposits + income - withdrawals - investments);
    assert_eq!(
        summary.net_flow,
        h.engine.net_flow("alice", DateRange::all())
    );

    let bob = h.engine.get_wallet_balances("bob").await.unwrap();
    assert_eq!(bob.main, 1_990);
}

#[tokio::test]
async fn forms_are_validated_before_the_engine() {
    let h = harness();
    deposit(&h, "alice", 10_000).await;

    assert_err!(
        h.engine
            .submit_withdrawal_form(
                "alice",
                WithdrawalForm {
                    kind: "capital".to_string(),
                    amount: "5000".to_string(),
                    method: "bank".to_string(),
                    investment_id: None,
                },
            )
            .await
    );

    let err = h
        .engine
        .submit_transfer_form(
            "alice",
            TransferForm {
                amount: "5000".to_string(),
                from_wallet: Some("main".to_string()),
                to_wallet: Some("investment".to_string()),
                to_user: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(
        h.engine.get_wallet_balances("alice").await.unwrap().main,
        10_000
    );
}

#[tokio::test]
async fn pending_requests_track_lifecycle() {
    let h = harness();
    deposit(&h, "alice", 30_000).await;

    let transfer = h
        .engine
        .request_transfer(
            "alice",
            TransferTarget::User {
                to_user: "carol".to_string(),
            },
            10_000,
        )
        .await
        .unwrap();
    assert_eq!(h.engine.pending_requests().await.unwrap().transfers.len(), 1);

    h.engine.cancel_transfer(&transfer.id).await.unwrap();
    let pending = h.engine.pending_requests().await.unwrap();
    assert!(pending.transfers.is_empty());
    assert_eq!(
        h.engine.get_wallet_balances("alice").await.unwrap().main,
        30_000
    );
    assert_eq!(h.engine.list_transfers("carol").await.unwrap().len(), 1);
}
