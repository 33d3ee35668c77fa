use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use cutify_contracts::errors::UploadError;
use cutify_contracts::events::{new_session_id, EventWriter};
use cutify_contracts::mutation::MutationStatus;
use cutify_contracts::treasury::{format_eth_4dp, Ownership};
use cutify_contracts::workflow::Phase;
use cutify_engine::chain::RpcChainClient;
use cutify_engine::fetch::image_bytes_from_url;
use cutify_engine::generate::{DryrunProvider, GeminiProvider, ImageProvider, MutationEngine};
use cutify_engine::host::NullHost;
use cutify_engine::mint::{share_text, success_message, MintOutcome};
use cutify_engine::session::{CutifySession, WithdrawOutcome};
use cutify_engine::storage::{ContentStorage, PinataStorage};
use cutify_engine::wallet::{default_backoff, StaticWallet, MINI_APP_CONNECTOR_ID};

#[derive(Debug, Parser)]
#[command(name = "cutify", version, about = "Cutify your Warplets from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the Warplets a wallet owns.
    Assets(AssetsArgs),
    /// Generate a cutified version of an owned Warplet, optionally
    /// remixing and minting it.
    Cutify(CutifyArgs),
    /// Inspect or drain the mutant contract treasury.
    Treasury(TreasuryCommand),
}

#[derive(Debug, Parser)]
struct AssetsArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct CutifyArgs {
    #[arg(long)]
    owner: String,
    /// Token id to cutify; required when the wallet owns more than one.
    #[arg(long)]
    token_id: Option<String>,
    /// Extra remix passes after the first generation.
    #[arg(long, default_value_t = 0)]
    remix: u32,
    /// Mint the result after generation.
    #[arg(long)]
    mint: bool,
    #[arg(long, value_enum, default_value_t = ProviderKind::Gemini)]
    provider: ProviderKind,
    /// Directory for the cutified image and events.jsonl.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Gemini,
    Dryrun,
}

#[derive(Debug, Parser)]
struct TreasuryCommand {
    #[command(subcommand)]
    action: TreasuryAction,
}

#[derive(Debug, Subcommand)]
enum TreasuryAction {
    /// Show the treasury balance (owner only).
    Balance(TreasuryArgs),
    /// Withdraw the full balance to the owner.
    Withdraw(TreasuryArgs),
}

#[derive(Debug, Parser)]
struct TreasuryArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("cutify error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Assets(args) => run_assets(args),
        Command::Cutify(args) => run_cutify(args),
        Command::Treasury(command) => match command.action {
            TreasuryAction::Balance(args) => run_treasury(args, false),
            TreasuryAction::Withdraw(args) => run_treasury(args, true),
        },
    }
}

fn run_assets(args: AssetsArgs) -> Result<i32> {
    let events = events_writer(args.events)?;
    let mut session = build_session(&args.owner, ProviderKind::Dryrun, events)?;
    if !connect(&mut session)? {
        return Ok(1);
    }

    match session.workflow.phase() {
        Phase::Empty => {
            println!("No Warplets owned by {}.", args.owner);
        }
        Phase::LoadFailed(message) => {
            eprintln!("{message}");
            return Ok(1);
        }
        _ => {
            for nft in session.workflow.owned() {
                println!("#{}\t{}\t{}", nft.token_id, nft.display_name(), nft.image);
            }
        }
    }
    Ok(0)
}

fn run_cutify(args: CutifyArgs) -> Result<i32> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let events = EventWriter::new(args.out.join("events.jsonl"), new_session_id());

    let mut session = build_session(&args.owner, args.provider, events)?;
    if !connect(&mut session)? {
        return Ok(1);
    }

    match session.workflow.phase() {
        Phase::Empty => {
            eprintln!("No Warplets owned by {}.", args.owner);
            return Ok(1);
        }
        Phase::LoadFailed(message) => {
            eprintln!("{message}");
            return Ok(1);
        }
        Phase::Selecting => {
            let Some(token_id) = args.token_id.as_deref() else {
                eprintln!("Multiple Warplets owned; pick one with --token-id:");
                for nft in session.workflow.owned() {
                    eprintln!("  #{}\t{}", nft.token_id, nft.display_name());
                }
                return Ok(1);
            };
            if !session.select(token_id)? {
                bail!("token {token_id} is not owned by {}", args.owner);
            }
        }
        _ => {}
    }

    if session.workflow.mutation.status() == MutationStatus::Error {
        if let Some(message) = session.workflow.mutation.error() {
            eprintln!("{message}");
        }
        return Ok(1);
    }

    for pass in 0..args.remix {
        if !session.remix()? {
            eprintln!(
                "Remix pass {} failed; keeping the previous version.",
                pass + 1
            );
        }
    }

    let Some(result) = session.workflow.mutation.result().cloned() else {
        bail!("no cutified image was produced");
    };
    let image_path = write_image(&result.mutated_image_url, &args.out)?;
    println!("Cutified image written to {}", image_path.display());

    if args.mint {
        if let Ok(fee) = session.mutation_fee() {
            println!("Mint fee: {} ETH", format_eth_4dp(fee));
        }
        match session.mint()? {
            MintOutcome::Completed(success) => {
                println!("{}", success_message(&success));
                println!("Share it: {}", share_text(&success));
            }
            MintOutcome::Failed { user_message, .. } => {
                eprintln!("{user_message}");
                return Ok(1);
            }
            MintOutcome::NotReady => {
                eprintln!("Nothing mintable right now.");
                return Ok(1);
            }
        }
    }
    Ok(0)
}

fn run_treasury(args: TreasuryArgs, withdraw: bool) -> Result<i32> {
    let events = events_writer(args.events)?;
    let mut session = build_session(&args.owner, ProviderKind::Dryrun, events)?;
    if !connect(&mut session)? {
        return Ok(1);
    }
    session.treasury_open()?;

    match session.treasury.ownership() {
        Ownership::NotOwner => {
            println!("Connected address is not the contract owner.");
            return Ok(if withdraw { 1 } else { 0 });
        }
        Ownership::Unknown => {
            eprintln!("Could not resolve the contract owner.");
            return Ok(1);
        }
        Ownership::Owner => {}
    }
    println!("Treasury balance: {} ETH", session.treasury.balance_display());

    if withdraw {
        match session.treasury_withdraw()? {
            WithdrawOutcome::Completed { hash } => {
                println!("Withdrawal sent: {hash}");
                println!(
                    "Treasury balance: {} ETH",
                    session.treasury.balance_display()
                );
            }
            WithdrawOutcome::Failed { user_message, .. } => {
                eprintln!("{user_message}");
                return Ok(1);
            }
            WithdrawOutcome::NotReady => {
                eprintln!("Nothing to withdraw.");
                return Ok(1);
            }
        }
    }
    Ok(0)
}

fn events_writer(path: Option<PathBuf>) -> Result<EventWriter> {
    Ok(EventWriter::new(
        path.unwrap_or_else(|| PathBuf::from("cutify-events.jsonl")),
        new_session_id(),
    ))
}

fn build_session(
    owner: &str,
    provider_kind: ProviderKind,
    events: EventWriter,
) -> Result<CutifySession> {
    let collection = RpcChainClient::from_env()?;
    let contract = RpcChainClient::from_env()?;

    let provider: Box<dyn ImageProvider> = match provider_kind {
        ProviderKind::Gemini => {
            if !gemini_configured() {
                bail!("GEMINI_API_KEY/GOOGLE_API_KEY not set; use --provider dryrun to run offline");
            }
            Box::new(GeminiProvider::new())
        }
        ProviderKind::Dryrun => Box::new(DryrunProvider),
    };

    let storage: Box<dyn ContentStorage> = match PinataStorage::from_env() {
        Ok(pinata) => Box::new(pinata),
        Err(err) => Box::new(UnconfiguredStorage(format!("{err:#}"))),
    };

    Ok(CutifySession::new(
        Box::new(StaticWallet::new(owner)),
        Box::new(NullHost),
        Box::new(collection),
        Box::new(contract),
        storage,
        MutationEngine::new(provider, events.clone()),
        events,
        default_backoff(),
    ))
}

fn connect(session: &mut CutifySession) -> Result<bool> {
    session.start()?;
    if session.workflow.is_connected() {
        return Ok(true);
    }
    if !session.connect(MINI_APP_CONNECTOR_ID)? {
        eprintln!("Could not connect the configured wallet.");
        return Ok(false);
    }
    Ok(true)
}

fn gemini_configured() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_API_KEY"].iter().any(|key| {
        std::env::var(key)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    })
}

fn write_image(image_url: &str, out_dir: &Path) -> Result<PathBuf> {
    let image = image_bytes_from_url(&HttpClient::new(), image_url)?;
    let extension = match image.mime_type.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    };
    let path = out_dir.join(format!("cutified.{extension}"));
    fs::write(&path, &image.bytes)
        .with_context(|| format!("failed writing image to {}", path.display()))?;
    Ok(path)
}

/// Placeholder storage for sessions that never mint; any upload attempt
/// reports why storage is unavailable.
struct UnconfiguredStorage(String);

impl ContentStorage for UnconfiguredStorage {
    fn upload_image(&self, _bytes: &[u8], _mime_type: &str) -> Result<String, UploadError> {
        Err(UploadError(self.0.clone()))
    }

    fn upload_metadata(&self, _metadata: &Value) -> Result<String, UploadError> {
        Err(UploadError(self.0.clone()))
    }
}
