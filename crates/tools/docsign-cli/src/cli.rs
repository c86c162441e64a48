use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{DirectorsCmd, DocumentCmd, IdentityCmd, SignArgs, TemplateCmd, VerifyArgs};

#[derive(Parser, Debug)]
#[command(name = "docsign", author, version, about = "Multi-party document signing", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global_opts: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Config file (defaults to $DOCSIGN_CONFIG, then ./docsign.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the SQLite database path from the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register documents, complete them and inspect their signatures
    #[command(subcommand)]
    Document(DocumentCmd),

    /// Manage the director role
    #[command(subcommand)]
    Directors(DirectorsCmd),

    /// Manage the statement template catalog
    #[command(subcommand)]
    Template(TemplateCmd),

    /// Sign a document as a user
    Sign(SignArgs),

    /// Re-verify a stored signature against the current document
    Verify(VerifyArgs),

    /// Inspect signing identities
    #[command(subcommand)]
    Identity(IdentityCmd),
}
