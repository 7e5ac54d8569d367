//! `factoryd` CLI: signs factory commands, keeps the committed command log,
//! and answers registry queries by replaying it.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use fs2::FileExt;
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use factory_core::signing::sign_command;
use factory_core::{verify_journal, CheckpointWriter, DeploymentSpace, Receipt, Sequencer};
use factory_spec::{Address, Command, EntityId, EntityParams, SignedCommand, TemplateRef};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Factoryd command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Committed command log.
    #[arg(
        long,
        env = "FACTORY_STATE",
        value_name = "FILE",
        default_value = "factory.log",
        help = "Path to the JSON-lines log of committed signed commands"
    )]
    state: PathBuf,
    /// Signing key seed.
    #[arg(
        long,
        env = "FACTORY_KEY",
        value_name = "FILE",
        help = "Path to a file holding a hex-encoded ed25519 seed"
    )]
    key: Option<PathBuf>,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for factoryd.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a signing key.
    Keygen {
        /// Output file for the hex seed.
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Print the account address of the configured key.
    Whoami,
    /// Construct the factory; the key holder becomes owner.
    Deploy {
        /// Initial template address.
        #[arg(long)]
        template: Address,
        /// Salt mixed into the factory identity.
        #[arg(long, default_value = "0")]
        salt: u64,
    },
    /// Replace the active template.
    SetTemplate {
        /// New template address.
        #[arg(long)]
        template: Address,
    },
    /// Hand factory ownership to another account.
    TransferOwnership {
        /// New owner address.
        #[arg(long)]
        new_owner: Address,
    },
    /// Print the address an identifier will be cloned to.
    Predict {
        /// Entity identifier.
        #[arg(long)]
        id: u64,
    },
    /// Clone, initialize, and register an entity.
    Create {
        /// Entity identifier.
        #[arg(long)]
        id: u64,
        /// Display name.
        #[arg(long)]
        name: String,
        /// Short symbol.
        #[arg(long)]
        symbol: String,
        /// Category; repeat for several.
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Per-item metadata URI prefix.
        #[arg(long, default_value = "")]
        base_uri: String,
        /// Collection metadata URI.
        #[arg(long, default_value = "")]
        contract_uri: String,
        /// Administrative owner of the clone.
        #[arg(long)]
        owner: Address,
    },
    /// Print the registered address for an identifier.
    AddressOf {
        /// Entity identifier.
        #[arg(long)]
        id: u64,
    },
    /// Print the number of created entities.
    Count,
    /// Print the address at a creation index.
    At {
        /// Zero-based index.
        #[arg(long)]
        index: usize,
    },
    /// Print the active template.
    Template,
    /// Print the event journal with checkpoints.
    Events {
        /// Checkpoint interval.
        #[arg(short, long, default_value = "10")]
        checkpoint: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let key = cli.key.as_deref();
    match cli.command {
        Commands::Keygen { out } => keygen(&out).await?,
        Commands::Whoami => {
            let signer = load_key(key).await?;
            println!("{}", Address::from_verifying_key(&signer.verifying_key()));
        }
        Commands::Deploy { template, salt } => {
            deploy(&cli.state, key, TemplateRef::new(template), salt).await?
        }
        Commands::SetTemplate { template } => {
            let command = Command::SetTemplate {
                template: TemplateRef::new(template),
            };
            submit(&cli.state, key, command).await?;
        }
        Commands::TransferOwnership { new_owner } => {
            submit(&cli.state, key, Command::TransferOwnership { new_owner }).await?;
        }
        Commands::Create {
            id,
            name,
            symbol,
            categories,
            base_uri,
            contract_uri,
            owner,
        } => {
            let params = EntityParams {
                id: EntityId(id),
                name,
                symbol,
                categories,
                base_uri,
                contract_uri,
                owner,
            };
            let receipt = submit(&cli.state, key, Command::Create(params)).await?;
            if let Some(address) = receipt.address {
                println!("{address}");
            }
        }
        Commands::Predict { id } => {
            let sequencer = read_sequencer(&cli.state).await?;
            println!("{}", sequencer.predict_address(EntityId(id)));
        }
        Commands::AddressOf { id } => {
            let sequencer = read_sequencer(&cli.state).await?;
            match sequencer.entity_address_of(EntityId(id)) {
                Some(address) => println!("{address}"),
                None => println!("absent"),
            }
        }
        Commands::Count => {
            let sequencer = read_sequencer(&cli.state).await?;
            println!("{}", sequencer.count_entities());
        }
        Commands::At { index } => {
            let sequencer = read_sequencer(&cli.state).await?;
            println!("{}", sequencer.entity_at(index)?);
        }
        Commands::Template => {
            let sequencer = read_sequencer(&cli.state).await?;
            println!("{}", sequencer.current_template());
        }
        Commands::Events { checkpoint } => {
            let sequencer = read_sequencer(&cli.state).await?;
            print_events(&sequencer, checkpoint)?;
        }
    }
    Ok(())
}

async fn keygen(out: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(out).await? {
        bail!("refusing to overwrite existing key {}", out.display());
    }
    let signer = SigningKey::generate(&mut rand_core::OsRng);
    tokio::fs::write(out, format!("{}\n", hex::encode(signer.to_bytes())))
        .await
        .with_context(|| format!("write key {}", out.display()))?;
    println!("{}", Address::from_verifying_key(&signer.verifying_key()));
    Ok(())
}

async fn load_key(path: Option<&Path>) -> anyhow::Result<SigningKey> {
    let path = path.ok_or_else(|| anyhow!("--key (or FACTORY_KEY) is required for this command"))?;
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read key {}", path.display()))?;
    let mut seed = [0u8; 32];
    hex::decode_to_slice(text.trim(), &mut seed)
        .context("key file must hold exactly 64 hex digits")?;
    Ok(SigningKey::from_bytes(&seed))
}

async fn load_log(path: &Path) -> anyhow::Result<Vec<SignedCommand>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read command log {}", path.display()))?;
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("parse command log line {}", n + 1))
        })
        .collect()
}

async fn append_log(path: &Path, command: &SignedCommand) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("open command log {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn open_sequencer(state: &Path) -> anyhow::Result<Sequencer> {
    let log = load_log(state).await?;
    if log.is_empty() {
        bail!("no factory deployed at {}; run `factoryd deploy` first", state.display());
    }
    let sequencer = Sequencer::replay(log, DeploymentSpace::new())?;
    Ok(sequencer)
}

/// Replay under a shared lock so no writer is mid-append.
async fn read_sequencer(state: &Path) -> anyhow::Result<Sequencer> {
    let _lock = StateLock::shared(state).await?;
    open_sequencer(state).await
}

async fn deploy(
    state: &Path,
    key: Option<&Path>,
    template: TemplateRef,
    salt: u64,
) -> anyhow::Result<()> {
    let _lock = StateLock::exclusive(state).await?;
    if !load_log(state).await?.is_empty() {
        bail!("factory already deployed at {}", state.display());
    }
    let signer = load_key(key).await?;
    let signed = sign_command(Command::Deploy { template, salt }, &signer)?;
    let sequencer = Sequencer::genesis(signed.clone(), DeploymentSpace::new())?;
    append_log(state, &signed).await?;
    info!(factory = %sequencer.identity(), "factory deployed");
    println!("{}", sequencer.identity());
    Ok(())
}

async fn submit(state: &Path, key: Option<&Path>, command: Command) -> anyhow::Result<Receipt> {
    // Held from replay through append so concurrent runs see each other's commits.
    let _lock = StateLock::exclusive(state).await?;
    let sequencer = open_sequencer(state).await?;
    let signer = load_key(key).await?;
    let signed = sign_command(command, &signer)?;
    let receipt = sequencer.submit(signed.clone())?;
    append_log(state, &signed).await?;
    for event in &receipt.events {
        info!(sequence = receipt.sequence, event = event.kind(), "committed");
    }
    Ok(receipt)
}

fn print_events(sequencer: &Sequencer, interval: usize) -> anyhow::Result<()> {
    let entries = sequencer.journal_entries();
    verify_journal(&entries)?;
    let mut writer = CheckpointWriter::new();
    for (idx, entry) in entries.iter().enumerate() {
        println!(
            "seq={} kind={} event={}",
            entry.seq,
            entry.event.kind(),
            serde_json::to_string(&entry.event)?
        );
        if let Some(cp) = writer.maybe_checkpoint(&entries[..=idx], interval) {
            println!("checkpoint length={} root={}", cp.length, hex::encode(cp.root));
        }
    }
    Ok(())
}

/// Advisory lock on `<state>.lock`, released on drop.
struct StateLock {
    file: File,
}

impl StateLock {
    async fn exclusive(state: &Path) -> anyhow::Result<Self> {
        Self::acquire(state, true).await
    }

    async fn shared(state: &Path) -> anyhow::Result<Self> {
        Self::acquire(state, false).await
    }

    async fn acquire(state: &Path, exclusive: bool) -> anyhow::Result<Self> {
        let path = lock_path(state);
        let shown = path.display().to_string();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            if exclusive {
                file.lock_exclusive()?;
            } else {
                file.lock_shared()?;
            }
            Ok(file)
        })
        .await?
        .with_context(|| format!("lock state {shown}"))?;
        debug!(lock = %shown, exclusive, "state lock acquired");
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(state: &Path) -> PathBuf {
    let mut name = OsString::from(state.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}
