use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use privpool_sdk::contract::IPrivacyPool::{self, IPrivacyPoolInstance};
use privpool_sdk::{
    derive_commitment, format_commitment, generate_secret, parse_secret, CircuitArtifacts,
    EncryptedSecretStore, FileStorage, KeySession, LocalWalletSigner, MessageSigner,
    PrivacyClient, ProofGenerator, RelayerClient, SdkError, SecretRecord, SecretStore,
};
use privpool_transport::{Config as TransportConfig, DEFAULT_TOR_SOCKS_ADDR};

#[derive(Parser, Debug)]
#[command(name = "privpool")]
#[command(about = "Deposit into and withdraw from the privacy pool")]
struct Cli {
    #[arg(long, env = "RPC_URL", default_value = "https://sepolia.base.org", global = true)]
    rpc: String,

    #[arg(long, env = "PRIVACY_POOL_ADDRESS", global = true)]
    pool: Option<Address>,

    #[arg(long, env = "OWNER_PRIVATE_KEY", hide_env_values = true, global = true)]
    owner_key: Option<String>,

    #[arg(long, env = "PRIVPOOL_STORE_DIR", default_value = "~/.privpool", global = true)]
    store_dir: String,

    /// Sign the store key message without asking
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RelayerArgs {
    #[arg(long, env = "RELAYER_URL", default_value = "http://localhost:3001")]
    relayer_url: String,

    /// Route relayer traffic through Tor and refuse to send otherwise
    #[arg(long)]
    tor: bool,

    #[arg(long, env = "TOR_SOCKS_ADDR", default_value = DEFAULT_TOR_SOCKS_ADDR)]
    tor_socks_addr: String,
}

#[derive(Args, Debug)]
struct ProverArgs {
    #[arg(long, env = "CIRCUIT_WASM")]
    wasm: PathBuf,

    #[arg(long, env = "CIRCUIT_ZKEY")]
    zkey: PathBuf,

    #[arg(long, env = "SNARKJS_BIN", default_value = "npx snarkjs")]
    snarkjs: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a secret, store it, and deposit its commitment
    Deposit,
    /// Store a backed-up secret
    Import {
        #[arg(long)]
        secret: String,
        /// Checked against the commitment recomputed from the secret
        #[arg(long)]
        commitment: Option<B256>,
    },
    /// List stored deposits
    List,
    /// Withdraw a stored deposit to a fresh address through the relayer
    Withdraw {
        #[arg(long)]
        commitment: B256,
        #[arg(long)]
        recipient: Address,
        #[command(flatten)]
        relayer: RelayerArgs,
        #[command(flatten)]
        prover: ProverArgs,
    },
    /// Pool deposit count and balance
    Stats,
    /// Relayer health and balance
    RelayerStatus {
        #[command(flatten)]
        relayer: RelayerArgs,
    },
}

/// Shows the key message and asks before signing.
struct ConfirmingSigner {
    inner: LocalWalletSigner,
    auto_approve: bool,
}

#[async_trait]
impl MessageSigner for ConfirmingSigner {
    async fn sign_message(&self, message: &str) -> privpool_sdk::Result<Vec<u8>> {
        if !self.auto_approve {
            eprintln!("\nThe secret store asks you to sign:\n\n{}\n", message);
            let approved = tokio::task::spawn_blocking(|| {
                eprint!("Sign? [y/N] ");
                std::io::stderr().flush().ok();
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer).ok();
                matches!(answer.trim(), "y" | "Y" | "yes")
            })
            .await
            .map_err(|e| SdkError::Signer(e.to_string()))?;

            if !approved {
                return Err(SdkError::UserRejectedSignature);
            }
        }
        self.inner.sign_message(message).await
    }
}

struct Session {
    owner: Address,
    signer: ConfirmingSigner,
    wallet: EthereumWallet,
    store: Arc<EncryptedSecretStore<FileStorage>>,
}

impl Cli {
    fn session(&self) -> Result<Session> {
        let key = self
            .owner_key
            .as_deref()
            .ok_or_else(|| anyhow!("OWNER_PRIVATE_KEY (or --owner-key) is required"))?;
        let inner = LocalWalletSigner::from_hex(key)?;
        let owner = inner.address();
        let wallet = EthereumWallet::from(inner.inner().clone());

        let dir = shellexpand::tilde(&self.store_dir).to_string();
        let store = EncryptedSecretStore::new(FileStorage::new(dir)?, Arc::new(KeySession::new()));

        Ok(Session {
            owner,
            signer: ConfirmingSigner {
                inner,
                auto_approve: self.yes,
            },
            wallet,
            store: Arc::new(store),
        })
    }

    fn pool_address(&self) -> Result<Address> {
        self.pool
            .ok_or_else(|| anyhow!("PRIVACY_POOL_ADDRESS (or --pool) is required"))
    }

    fn read_pool(&self) -> Result<IPrivacyPoolInstance<DynProvider>> {
        let provider = ProviderBuilder::new()
            .connect_http(self.rpc.parse().context("Invalid RPC URL")?)
            .erased();
        Ok(IPrivacyPool::new(self.pool_address()?, provider))
    }

    fn write_pool(&self, wallet: EthereumWallet) -> Result<IPrivacyPoolInstance<DynProvider>> {
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc.parse().context("Invalid RPC URL")?)
            .erased();
        Ok(IPrivacyPool::new(self.pool_address()?, provider))
    }
}

impl RelayerArgs {
    fn client(&self) -> Result<RelayerClient> {
        let config = if self.tor {
            TransportConfig::tor().with_socks_addr(&self.tor_socks_addr)
        } else {
            TransportConfig::direct()
        };
        let client = RelayerClient::new(&self.relayer_url, config)?;
        Ok(if self.tor { client.require_tor() } else { client })
    }
}

fn format_timestamp(millis: u64) -> String {
    DateTime::from_timestamp_millis(millis as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn deposit(cli: &Cli) -> Result<()> {
    let session = cli.session()?;
    let pool = cli.write_pool(session.wallet.clone())?;

    let amount = pool.DEPOSIT_AMOUNT().call().await?;
    let record = SecretRecord::new(generate_secret()?);

    // Stored before the transaction so a crash after broadcast cannot lose the secret.
    let version = session
        .store
        .save(record.clone(), session.owner, &session.signer)
        .await?;
    info!("Secret stored ({:?})", version);

    println!("Depositing {} ETH", format_ether(amount));
    let pending = pool.deposit(record.commitment).value(amount).send().await?;

    println!();
    println!("  Commitment: {}", record.commitment);
    println!("  Secret:     {}", record.secret.to_hex());
    println!("  Tx hash:    {}", pending.tx_hash());
    println!();
    println!("Back up the secret. Anyone holding it can withdraw this deposit.");
    Ok(())
}

async fn import(cli: &Cli, secret: &str, commitment: Option<B256>) -> Result<()> {
    let secret = parse_secret(secret)?;
    let derived = derive_commitment(&secret);
    if let Some(expected) = commitment {
        if expected != derived {
            return Err(anyhow!(
                "Secret does not match commitment {} (derived {})",
                expected,
                derived
            ));
        }
    }

    if cli.pool.is_some() {
        let deposited = cli.read_pool()?.getAllCommitments().call().await?;
        if !deposited.contains(&derived) {
            println!(
                "Warning: {} is not deposited in the pool",
                format_commitment(&derived)
            );
        }
    }

    let session = cli.session()?;
    session
        .store
        .save(SecretRecord::new(secret), session.owner, &session.signer)
        .await?;
    println!("Imported {}", format_commitment(&derived));
    Ok(())
}

async fn list(cli: &Cli) -> Result<()> {
    let session = cli.session()?;
    let records = session.store.load(session.owner, &session.signer).await?;
    if records.is_empty() {
        println!("No stored deposits for {}", session.owner);
        return Ok(());
    }

    let pool = cli.pool.map(|_| cli.read_pool()).transpose()?;
    println!("Deposits for {}:", session.owner);
    for record in &records {
        let status = match &pool {
            Some(pool) => match pool.isNullifierUsed(record.nullifier).call().await {
                Ok(true) => "withdrawn",
                Ok(false) => "unspent",
                Err(_) => "unknown",
            },
            None => "-",
        };
        println!(
            "  {}  {}  {}",
            format_commitment(&record.commitment),
            format_timestamp(record.timestamp),
            status
        );
    }
    Ok(())
}

async fn withdraw(
    cli: &Cli,
    commitment: B256,
    recipient: Address,
    relayer: &RelayerArgs,
    prover: &ProverArgs,
) -> Result<()> {
    let session = cli.session()?;

    let artifacts = CircuitArtifacts::new(&prover.wasm, &prover.zkey);
    artifacts.validate()?;
    let generator = ProofGenerator::snarkjs(&prover.snarkjs, artifacts)?;

    let store: Arc<dyn SecretStore> = session.store.clone();
    let client = PrivacyClient::new(store, Arc::new(generator), Arc::new(relayer.client()?));

    println!("Generating proof, this can take a while...");
    let receipt = client
        .withdraw(commitment, recipient, session.owner, &session.signer)
        .await?;

    println!();
    println!("  Nullifier hash: {}", receipt.nullifier_hash);
    println!("  Tx hash:        {}", receipt.tx_hash);
    if receipt.store_version.is_none() {
        println!("  (record could not be removed from the local store)");
    }
    Ok(())
}

async fn stats(cli: &Cli) -> Result<()> {
    let pool = cli.read_pool()?;
    let count = pool.getCommitmentsCount().call().await?;
    let balance = pool.getBalance().call().await?;
    let amount = pool.DEPOSIT_AMOUNT().call().await?;

    println!("  Pool:           {}", pool.address());
    println!("  Deposits:       {}", count);
    println!("  Balance:        {} ETH", format_ether(balance));
    println!("  Deposit amount: {} ETH", format_ether(amount));
    Ok(())
}

async fn relayer_status(relayer: &RelayerArgs) -> Result<()> {
    let client = relayer.client()?;
    let health = client.health().await?;
    println!("  Status:   {} (v{})", health.status, health.version);
    println!("  Network:  {}", health.network);
    println!("  Relayer:  {}", health.relayer_address);
    println!("  Pool:     {}", health.pool_address);

    match client.balance().await {
        Ok(balance) => println!("  Balance:  {} ETH", balance.balance_eth),
        Err(e) => println!("  Balance:  unavailable ({})", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "privpool=info,privpool_sdk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Deposit => deposit(&cli).await,
        Command::Import { secret, commitment } => import(&cli, secret, *commitment).await,
        Command::List => list(&cli).await,
        Command::Withdraw {
            commitment,
            recipient,
            relayer,
            prover,
        } => withdraw(&cli, *commitment, *recipient, relayer, prover).await,
        Command::Stats => stats(&cli).await,
        Command::RelayerStatus { relayer } => relayer_status(relayer).await,
    }
}
