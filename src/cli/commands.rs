//! CLI command implementations

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::DateRange;
use crate::config::Config;
use crate::engine::TransactionFilter;
use crate::error::Error;
use crate::external::{KycStatus, SettlementOutcome};
use crate::ledger::{Category, EntryStatus, WalletKind};
use crate::processor::{TransferForm, WithdrawalForm};
use crate::shop::{NewShop, ShopStatus};

use super::Session;

/// Show the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display());
    Ok(())
}

/// Create a deposit intent, optionally settling it right away
pub async fn deposit(session: &Session, user: &str, amount: u64, settle: bool) -> Result<()> {
    let intent = session.engine.initiate_deposit(user, amount).await?;
    println!("Deposit intent: {} ({} for {})", intent.intent_id, intent.amount, user);

    if settle {
        let intent = session
            .engine
            .on_deposit_settled(&intent.intent_id, SettlementOutcome::Succeeded)
            .await?;
        println!("Status: {}", intent.status);
    }
    Ok(())
}

pub struct ShopArgs {
    pub name: String,
    pub daily_percent: Option<String>,
    pub duration_days: u32,
    pub min_amount: u64,
    pub max_amount: u64,
    pub total_slots: u32,
}

pub async fn shop_create(session: &Session, args: ShopArgs) -> Result<()> {
    let daily_percent_bps = args
        .daily_percent
        .as_deref()
        .map(parse_percent_bps)
        .transpose()?;

    let shop = session
        .engine
        .create_shop(NewShop {
            name: args.name,
            daily_percent_bps,
            duration_days: args.duration_days,
            min_amount: args.min_amount,
            max_amount: args.max_amount,
            total_slots: args.total_slots,
        })
        .await?;

    println!("Created shop {} ({})", shop.name, shop.id);
    println!(
        "  {}%/day for {} days, {}..={}, {} slots",
        shop.daily_percent_display(),
        shop.duration_days,
        shop.min_amount,
        shop.max_amount,
        shop.total_slots
    );
    Ok(())
}

pub async fn shop_list(session: &Session) -> Result<()> {
    let shops = session.engine.list_shops().await?;

    println!("\n=== SHOPS ===\n");
    if shops.is_empty() {
        println!("No shops.");
        return Ok(());
    }
    println!(
        "{:<36} {:<20} {:>8} {:>6} {:>11} {:<12}",
        "ID", "NAME", "%/DAY", "DAYS", "SLOTS", "STATUS"
    );
    println!("{}", "-".repeat(100));
    for shop in shops {
        println!(
            "{:<36} {:<20} {:>8} {:>6} {:>5}/{:<5} {:<12}",
            shop.id,
            shop.name,
            shop.daily_percent_display(),
            shop.duration_days,
            shop.filled_slots,
            shop.total_slots,
            shop.status
        );
    }
    Ok(())
}

pub async fn shop_status(session: &Session, shop_id: &str, status: &str) -> Result<()> {
    let shop_id = parse_id(shop_id)?;
    let status: ShopStatus = status.parse()?;
    let shop = session.engine.set_shop_status(&shop_id, status).await?;
    println!("Shop {} is now {}", shop.name, shop.status);
    Ok(())
}

pub async fn invest(session: &Session, user: &str, shop_id: &str, amount: u64) -> Result<()> {
    let shop_id = parse_id(shop_id)?;
    let investment = session.engine.open_investment(user, &shop_id, amount).await?;

    println!("Investment {} opened", investment.id);
    println!("  Shop: {}", investment.shop_name);
    println!("  Capital: {}", investment.capital);
    println!(
        "  Daily profit: {} for {} days (total {})",
        investment.daily_profit(),
        investment.duration_days,
        investment.expected_profit()
    );
    println!("  Matures: {}", investment.end_date);
    Ok(())
}

pub async fn withdraw(session: &Session, user: &str, form: WithdrawalForm) -> Result<()> {
    let request = session.engine.submit_withdrawal_form(user, form).await?;
    println!("Withdrawal {} pending", request.id);
    println!(
        "  {}: {} (fee {}, net {}) via {}",
        request.kind, request.amount, request.fee, request.net_amount, request.method
    );
    Ok(())
}

pub async fn transfer(session: &Session, user: &str, form: TransferForm) -> Result<()> {
    let request = session.engine.submit_transfer_form(user, form).await?;
    println!("Transfer {} pending", request.id);
    println!(
        "  {}: {} (fee {}, net {})",
        request.target, request.amount, request.fee, request.net_amount
    );
    Ok(())
}

/// Approve a withdrawal or transfer by id
pub async fn approve(session: &Session, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    match session.engine.approve_withdrawal(&id).await {
        Ok(request) => {
            println!("Withdrawal {} {}", request.id, request.status);
            Ok(())
        }
        Err(Error::NotFound(_)) => {
            let request = session.engine.approve_transfer(&id).await?;
            println!("Transfer {} {}", request.id, request.status);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn reject(session: &Session, id: &str, reason: &str) -> Result<()> {
    let id = parse_id(id)?;
    match session.engine.reject_withdrawal(&id, reason).await {
        Ok(request) => println!("Withdrawal {} rejected, {} refunded", request.id, request.amount),
        Err(Error::NotFound(_)) => {
            let request = session.engine.reject_transfer(&id, reason).await?;
            println!("Transfer {} rejected, {} refunded", request.id, request.amount);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn cancel(session: &Session, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    match session.engine.cancel_withdrawal(&id).await {
        Ok(request) => println!("Withdrawal {} cancelled, {} refunded", request.id, request.amount),
        Err(Error::NotFound(_)) => {
            let request = session.engine.cancel_transfer(&id).await?;
            println!("Transfer {} cancelled, {} refunded", request.id, request.amount);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Feed a gateway settlement for a withdrawal or a deposit intent
pub async fn settle(
    session: &Session,
    id: &str,
    deposit: bool,
    failed: Option<String>,
) -> Result<()> {
    let outcome = match failed {
        Some(reason) => SettlementOutcome::failed(reason),
        None => SettlementOutcome::Succeeded,
    };

    if deposit {
        let intent = session.engine.on_deposit_settled(id, outcome).await?;
        println!("Deposit {} {}", intent.intent_id, intent.status);
    } else {
        let request = session
            .engine
            .on_settlement_callback(&parse_id(id)?, outcome)
            .await?;
        println!("Withdrawal {} {}", request.id, request.status);
    }
    Ok(())
}

/// Daily accrual and maturity run
pub async fn accrue(session: &Session) -> Result<()> {
    let report = session.engine.run_daily().await?;
    println!("Investments processed: {}", report.investments);
    println!("Days accrued: {}", report.days_accrued);
    println!("Profit credited: {}", report.profit_credited);
    println!("Matured: {}", report.matured.len());
    if !report.deferred.is_empty() {
        warn!("{} investments deferred, run again", report.deferred.len());
    }
    Ok(())
}

pub async fn balances(session: &Session, user: &str) -> Result<()> {
    let balances = session.engine.get_wallet_balances(user).await?;
    println!("\n=== WALLETS: {} ===\n", user);
    println!("Main:       {}", balances.main);
    println!("Investment: {}", balances.investment);
    println!("Profit:     {}", balances.profit);
    println!("Total:      {}", balances.total());

    let investments = session.engine.list_investments(user).await?;
    if !investments.is_empty() {
        println!("\n=== INVESTMENTS ===\n");
        for inv in investments {
            println!(
                "{} {:<20} capital {} profit {}/{} {} (ends {})",
                inv.id,
                inv.shop_name,
                inv.capital,
                inv.accrued_profit,
                inv.expected_profit(),
                inv.status,
                inv.end_date
            );
        }
    }
    Ok(())
}

pub struct TransactionArgs {
    pub wallet: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub limit: usize,
}

pub async fn transactions(session: &Session, user: &str, args: TransactionArgs) -> Result<()> {
    let filter = TransactionFilter {
        wallet: args.wallet.as_deref().map(str::parse::<WalletKind>).transpose()?,
        category: args.category.as_deref().map(str::parse::<Category>).transpose()?,
        status: args.status.as_deref().map(str::parse::<EntryStatus>).transpose()?,
        limit: Some(args.limit),
        ..Default::default()
    };

    let entries = session.engine.list_transactions(user, &filter);
    println!("\n=== TRANSACTIONS: {} ===\n", user);
    if entries.is_empty() {
        println!("No transactions.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{} {:<10} {:>12} {:<10} {:<9}{}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.wallet,
            entry.amount,
            entry.category,
            entry.status,
            if entry.is_reversal() { " (reversal)" } else { "" }
        );
    }
    Ok(())
}

pub async fn analytics(
    session: &Session,
    user: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let range = match (from, to) {
        (None, None) => DateRange::all(),
        (from, to) => {
            let today = session.engine.clock().today();
            DateRange::days(from.unwrap_or(NaiveDate::MIN), to.unwrap_or(today))?
        }
    };

    let summary = session.engine.get_analytics_summary(user, range);
    println!("\n=== ANALYTICS: {} ===\n", user);
    for (category, total) in &summary.totals {
        println!("{:<12} {:>14}", category.to_string(), total);
    }
    println!("{}", "-".repeat(27));
    println!("{:<12} {:>14}", "net flow", summary.net_flow);
    Ok(())
}

pub async fn reconcile(session: &Session, user: &str) -> Result<()> {
    let mismatches = session.engine.reconcile(user).await?;
    if mismatches.is_empty() {
        println!("{}: all wallets match the ledger", user);
        return Ok(());
    }
    for mismatch in &mismatches {
        println!("{}", mismatch);
    }
    anyhow::bail!("{} wallet(s) out of balance", mismatches.len())
}

pub async fn pending(session: &Session) -> Result<()> {
    let pending = session.engine.pending_requests().await?;

    println!("\n=== PENDING WITHDRAWALS ===\n");
    for r in &pending.withdrawals {
        println!("{} {:<12} {:<24} {:>10} {}", r.id, r.owner, r.kind.to_string(), r.amount, r.status);
    }
    println!("\n=== PENDING TRANSFERS ===\n");
    for r in &pending.transfers {
        println!("{} {:<12} {:<24} {:>10}", r.id, r.owner, r.target.to_string(), r.amount);
    }
    println!("\n=== PENDING DEPOSITS ===\n");
    for d in &pending.deposits {
        println!("{} {:<12} {:>10}", d.intent_id, d.owner, d.amount);
    }
    Ok(())
}

pub async fn kyc(session: &Session, user: &str, status: &str) -> Result<()> {
    let status: KycStatus = status.parse()?;
    session.kyc.set_status(user, status);
    println!("KYC for {}: {}", user, status);
    Ok(())
}

pub async fn maintenance(session: &Session, enabled: bool) -> Result<()> {
    let settings = session.settings.set_maintenance_mode(enabled).await?;
    if enabled {
        warn!("Maintenance mode enabled - withdrawals and transfers are blocked");
    } else {
        info!("Maintenance mode disabled");
    }
    println!(
        "Maintenance mode: {} (settings version {})",
        settings.maintenance_mode, settings.version
    );
    Ok(())
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid id: {}", raw))
}

/// "1.25" -> 125 basis points of a percent
fn parse_percent_bps(raw: &str) -> Result<u32> {
    let raw = raw.trim().trim_end_matches('%');
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if frac.len() > 2 {
        anyhow::bail!("At most two decimals allowed: {}", raw);
    }
    let whole: u32 = whole.parse().with_context(|| format!("Invalid percent: {}", raw))?;
    let frac: u32 = if frac.is_empty() {
        0
    } else {
        format!("{:0<2}", frac)
            .parse()
            .with_context(|| format!("Invalid percent: {}", raw))?
    };
    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(frac))
        .with_context(|| format!("Percent too large: {}", raw))
}
