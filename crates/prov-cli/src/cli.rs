use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "prov",
    about = "Store and inspect the artifacts behind provenance records",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Repository configuration file (TOML). Defaults to ./prov.toml if present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Profile to operate on instead of the configured default.
    #[arg(short, long, global = true)]
    pub profile: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the repository if it does not exist yet
    Init(InitArgs),
    /// Store files as objects and print their keys
    Put(PutArgs),
    /// Write an object's bytes to stdout
    Cat(CatArgs),
    /// Report which keys are present
    Has(KeysArgs),
    /// List every object key
    Ls(LsArgs),
    /// Delete objects (all or nothing)
    Rm(KeysArgs),
    /// Print the BLAKE3 digest of an object
    Hash(CatArgs),
    /// Show repository identity and usage
    Info(InfoArgs),
    /// Irreversibly destroy the repository and all its objects
    Erase(EraseArgs),
    /// Export every object into a portable archive
    Export(ExportArgs),
    /// Copy every object of an archive into the repository
    Import(ImportArgs),
    /// Check that objects are readable and match their content hash
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Remove existing content first
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args)]
pub struct PutArgs {
    /// Files to store; `-` reads standard input
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct CatArgs {
    pub key: String,
}

#[derive(Args)]
pub struct KeysArgs {
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[derive(Args)]
pub struct LsArgs {}

#[derive(Args)]
pub struct InfoArgs {}

#[derive(Args)]
pub struct EraseArgs {
    /// Confirm the erase
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Base path of the archive; `.pack` and `.idx` are appended
    pub path: PathBuf,
}

#[derive(Args)]
pub struct ImportArgs {
    /// The archive's `.pack` file or base path
    pub archive: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Keys to check; every object when omitted
    pub keys: Vec<String>,
}
