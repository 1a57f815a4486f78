use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::KeyAlgorithm;

#[derive(Parser)]
#[command(
    name = "attest",
    about = "Tamper-evident, append-only audit ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file with [ledger], [storage] and [signing] tables
    /// (default: ./attest.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger log file, overriding [storage].path
    #[arg(long, global = true)]
    pub ledger: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Append one entry
    Append(AppendArgs),
    /// Append JSON lines as atomic batches
    Import(ImportArgs),
    /// List entries
    Log(LogArgs),
    /// Show one entry
    Show(ShowArgs),
    /// Verify chain integrity
    Verify(VerifyArgs),
    /// Show ledger statistics
    Stats,
    /// Print a Merkle inclusion proof for an entry
    Proof(ProofArgs),
    /// Write a new signing key
    Keygen(KeygenArgs),
}

#[derive(Args)]
pub struct AppendArgs {
    /// JSON payload
    pub payload: String,
    /// JSON metadata
    #[arg(short, long)]
    pub metadata: Option<String>,
    /// Sign with the configured key
    #[arg(long, conflicts_with = "no_sign")]
    pub sign: bool,
    /// Do not sign even if signatures are enabled
    #[arg(long)]
    pub no_sign: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// File with one JSON payload per line
    pub file: PathBuf,
    /// Entries committed per batch
    #[arg(short, long, default_value = "500")]
    pub batch_size: usize,
}

#[derive(Args)]
pub struct LogArgs {
    #[arg(long, default_value = "0")]
    pub offset: u64,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub sequence: u64,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// First sequence to check
    #[arg(long)]
    pub from: Option<u64>,
    /// Sequence to stop before
    #[arg(long)]
    pub to: Option<u64>,
    /// Expected Merkle root (hex) over the checked range
    #[arg(long)]
    pub root: Option<String>,
    /// Check a single entry
    #[arg(long, conflicts_with_all = ["from", "to", "root"])]
    pub entry: Option<u64>,
}

#[derive(Args)]
pub struct ProofArgs {
    pub sequence: u64,
}

#[derive(Args)]
pub struct KeygenArgs {
    /// Where to write the hex-encoded key
    #[arg(short, long, default_value = "attest.key")]
    pub output: PathBuf,
    /// Key type; match it with [signing].algorithm
    #[arg(short, long, value_enum, default_value = "ed25519")]
    pub algorithm: KeyAlgorithm,
    /// Modulus size for rsa_pss keys
    #[arg(long, default_value = "2048")]
    pub rsa_bits: usize,
    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}
