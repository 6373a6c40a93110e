//! Multi-signature settlement CLI
//!
//! A command-line interface for registering Neo N3 multi-signature
//! accounts, proposing transactions, collecting owner decisions and
//! running the reconciliation loop.

use clap::{Parser, Subcommand};
use multisig_settlement::cli::{self, AppState};
use multisig_settlement::config::SettlementConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "settlement")]
#[command(version = "0.1.0")]
#[command(about = "Neo N3 multi-signature settlement engine", long_about = None)]
struct Cli {
    /// Data directory for the record store
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Neo RPC endpoint, overrides the config file
    #[arg(long)]
    rpc_url: Option<String>,

    /// Network magic, overrides the config file
    #[arg(long)]
    network: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multi-signature account operations
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },

    /// Inspect transactions
    Tx {
        #[command(subcommand)]
        action: TxCommands,
    },

    /// Propose a new transaction
    Propose {
        #[command(subcommand)]
        action: ProposeCommands,
    },

    /// Submit an owner's decision on a transaction
    Sign {
        /// Transaction hash
        #[arg(long)]
        hash: String,

        /// Signer public key (compressed hex)
        #[arg(long)]
        signer: String,

        /// Approve the transaction
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,

        /// Reject the transaction
        #[arg(long)]
        reject: bool,

        /// 64-byte signature as hex, required with --approve
        #[arg(long)]
        signature: Option<String>,
    },

    /// Print the bytes an owner must sign
    SignData {
        /// Transaction hash
        #[arg(long)]
        hash: String,
    },

    /// Run the reconciliation loop until Ctrl+C
    Run,
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Register an M-of-N account
    Create {
        /// Signatures required
        #[arg(short, long)]
        threshold: usize,

        /// Owner public keys (comma-separated)
        #[arg(short, long)]
        keys: String,

        /// Optional label for the account
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Show an account
    Show {
        /// Account address or script hash
        #[arg(short, long)]
        address: String,
    },

    /// List all accounts
    List,
}

#[derive(Subcommand)]
enum TxCommands {
    /// List the transactions of an account
    List {
        /// Account address or script hash
        #[arg(short, long)]
        account: String,
    },

    /// Show a transaction
    Show {
        /// Transaction hash
        #[arg(long)]
        hash: String,
    },
}

#[derive(Subcommand)]
enum ProposeCommands {
    /// NEP-17 transfer out of the account
    Transfer {
        #[arg(long)]
        account: String,

        /// Proposing owner's public key
        #[arg(long)]
        proposer: String,

        /// Token contract hash
        #[arg(long)]
        asset: String,

        /// Recipient address or script hash
        #[arg(long)]
        to: String,

        /// Amount in token units, e.g. 1.5
        #[arg(long)]
        amount: String,

        /// `account` or an owner public key
        #[arg(long)]
        fee_payer: Option<String>,

        /// Additional signer: public key or contract hash
        #[arg(long)]
        additional_signer: Option<String>,
    },

    /// Contract invocation from the account
    Invoke {
        #[arg(long)]
        account: String,

        /// Proposing owner's public key
        #[arg(long)]
        proposer: String,

        /// Contract hash
        #[arg(long)]
        contract: String,

        #[arg(long)]
        method: String,

        /// Parameters as a JSON array of {"type", "value"} objects
        #[arg(long)]
        params: Option<String>,

        /// `account` or an owner public key
        #[arg(long)]
        fee_payer: Option<String>,

        /// Additional signer: public key or contract hash
        #[arg(long)]
        additional_signer: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<SettlementConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SettlementConfig::load(path)?,
        None => SettlementConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(rpc_url) = &cli.rpc_url {
        config.rpc_url = rpc_url.clone();
    }
    if let Some(network) = cli.network {
        config.network_magic = network;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = AppState::new(config).await?;

        match cli.command {
            Commands::Account { action } => match action {
                AccountCommands::Create {
                    threshold,
                    keys,
                    label,
                } => cli::cmd_account_create(&state, threshold, &keys, label).await?,
                AccountCommands::Show { address } => cli::cmd_account_show(&state, &address).await?,
                AccountCommands::List => cli::cmd_account_list(&state).await?,
            },

            Commands::Tx { action } => match action {
                TxCommands::List { account } => cli::cmd_tx_list(&state, &account).await?,
                TxCommands::Show { hash } => cli::cmd_tx_show(&state, &hash).await?,
            },

            Commands::Propose { action } => match action {
                ProposeCommands::Transfer {
                    account,
                    proposer,
                    asset,
                    to,
                    amount,
                    fee_payer,
                    additional_signer,
                } => {
                    cli::cmd_propose_transfer(
                        &state,
                        &account,
                        &proposer,
                        &asset,
                        &to,
                        &amount,
                        fee_payer.as_deref(),
                        additional_signer.as_deref(),
                    )
                    .await?
                }
                ProposeCommands::Invoke {
                    account,
                    proposer,
                    contract,
                    method,
                    params,
                    fee_payer,
                    additional_signer,
                } => {
                    cli::cmd_propose_invoke(
                        &state,
                        &account,
                        &proposer,
                        &contract,
                        &method,
                        params.as_deref(),
                        fee_payer.as_deref(),
                        additional_signer.as_deref(),
                    )
                    .await?
                }
            },

            Commands::Sign {
                hash,
                signer,
                approve,
                reject: _,
                signature,
            } => cli::cmd_sign(&state, &hash, &signer, approve, signature).await?,

            Commands::SignData { hash } => cli::cmd_sign_data(&state, &hash).await?,

            Commands::Run => cli::cmd_run(&state).await?,
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
