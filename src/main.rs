//! Wallet Engine - wallet and investment accounting from the command line
//!
//! State lives in a JSON file; every command loads it, applies one operation
//! and writes it back.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use wallet_engine::cli::commands::{self, ShopArgs, TransactionArgs};
use wallet_engine::cli::Session;
use wallet_engine::config::Config;
use wallet_engine::processor::{TransferForm, WithdrawalForm};

/// Wallet & investment accounting engine
#[derive(Parser)]
#[command(name = "wallet-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// State file (overrides engine.state_path)
    #[arg(short, long, env = "WALLET_STATE")]
    state: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,

    /// Create a deposit intent
    Deposit {
        user: String,
        amount: u64,

        /// Settle the intent immediately
        #[arg(long)]
        settle: bool,
    },

    /// Shop administration
    Shop {
        #[command(subcommand)]
        action: ShopAction,
    },

    /// Open an investment
    Invest {
        user: String,
        shop: String,
        amount: u64,
    },

    /// Request a profit or capital withdrawal
    Withdraw {
        user: String,
        amount: String,

        /// profit or capital
        #[arg(long, default_value = "profit")]
        kind: String,

        /// velvpay or bank
        #[arg(long, default_value = "bank")]
        method: String,

        /// Investment id (capital withdrawals)
        #[arg(long)]
        investment: Option<String>,
    },

    /// Request a wallet-to-wallet or user-to-user transfer
    Transfer {
        user: String,
        amount: String,

        /// Source wallet (main or profit)
        #[arg(long)]
        from: Option<String>,

        /// Destination wallet (main or profit)
        #[arg(long)]
        to: Option<String>,

        /// Recipient user id
        #[arg(long)]
        to_user: Option<String>,
    },

    /// Approve a pending withdrawal or transfer
    Approve { id: String },

    /// Reject a pending withdrawal or transfer
    Reject {
        id: String,

        #[arg(long, default_value = "rejected by admin")]
        reason: String,
    },

    /// Cancel a pending withdrawal or transfer
    Cancel { id: String },

    /// Apply a gateway settlement
    Settle {
        /// Withdrawal id, or payment intent id with --deposit
        id: String,

        /// The id is a deposit payment intent
        #[arg(long)]
        deposit: bool,

        /// Settle as failed with this reason
        #[arg(long)]
        failed: Option<String>,
    },

    /// Accrue daily profit and mature investments
    Accrue,

    /// Show wallet balances and investments
    Balances { user: String },

    /// List ledger entries, newest first
    Transactions {
        user: String,

        #[arg(long)]
        wallet: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Category totals and net flow
    Analytics {
        user: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Compare cached balances with a ledger replay
    Reconcile { user: String },

    /// Requests awaiting action
    Pending,

    /// Set a user's KYC status
    Kyc { user: String, status: String },

    /// Toggle maintenance mode
    Maintenance {
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },
}

#[derive(Subcommand)]
enum ShopAction {
    /// Create a shop
    Create {
        name: String,

        /// Daily percent, e.g. 1.5 (defaults to the configured rate)
        #[arg(long)]
        daily_percent: Option<String>,

        #[arg(long)]
        days: u32,

        #[arg(long)]
        min: u64,

        #[arg(long)]
        max: u64,

        #[arg(long)]
        slots: u32,
    },

    /// List all shops
    List,

    /// Set a shop's status (active, inactive, closed)
    Status { shop: String, status: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("wallet_engine=info".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if matches!(cli.command, Commands::Config) {
        return commands::show_config(&config);
    }

    let state_path = cli
        .state
        .clone()
        .unwrap_or_else(|| config.engine.state_path.clone());
    let session = match Session::open(&config, &state_path).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open state: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config => Ok(()),
        Commands::Deposit {
            user,
            amount,
            settle,
        } => commands::deposit(&session, &user, amount, settle).await,
        Commands::Shop { action } => match action {
            ShopAction::Create {
                name,
                daily_percent,
                days,
                min,
                max,
                slots,
            } => {
                let args = ShopArgs {
                    name,
                    daily_percent,
                    duration_days: days,
                    min_amount: min,
                    max_amount: max,
                    total_slots: slots,
                };
                commands::shop_create(&session, args).await
            }
            ShopAction::List => commands::shop_list(&session).await,
            ShopAction::Status { shop, status } => {
                commands::shop_status(&session, &shop, &status).await
            }
        },
        Commands::Invest { user, shop, amount } => {
            commands::invest(&session, &user, &shop, amount).await
        }
        Commands::Withdraw {
            user,
            amount,
            kind,
            method,
            investment,
        } => {
            let form = WithdrawalForm {
                kind,
                amount,
                method,
                investment_id: investment,
            };
            commands::withdraw(&session, &user, form).await
        }
        Commands::Transfer {
            user,
            amount,
            from,
            to,
            to_user,
        } => {
            let form = TransferForm {
                amount,
                from_wallet: from,
                to_wallet: to,
                to_user,
            };
            commands::transfer(&session, &user, form).await
        }
        Commands::Approve { id } => commands::approve(&session, &id).await,
        Commands::Reject { id, reason } => commands::reject(&session, &id, &reason).await,
        Commands::Cancel { id } => commands::cancel(&session, &id).await,
        Commands::Settle {
            id,
            deposit,
            failed,
        } => commands::settle(&session, &id, deposit, failed).await,
        Commands::Accrue => commands::accrue(&session).await,
        Commands::Balances { user } => commands::balances(&session, &user).await,
        Commands::Transactions {
            user,
            wallet,
            category,
            status,
            limit,
        } => {
            let args = TransactionArgs {
                wallet,
                category,
                status,
                limit,
            };
            commands::transactions(&session, &user, args).await
        }
        Commands::Analytics { user, from, to } => {
            commands::analytics(&session, &user, from, to).await
        }
        Commands::Reconcile { user } => commands::reconcile(&session, &user).await,
        Commands::Pending => commands::pending(&session).await,
        Commands::Kyc { user, status } => commands::kyc(&session, &user, &status).await,
        Commands::Maintenance { mode } => commands::maintenance(&session, mode == "on").await,
    };

    // Failed commands leave only completed or compensated changes behind
    if let Err(e) = session.save().await {
        error!("Failed to save state: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
