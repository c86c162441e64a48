use clap::{Args, Subcommand};
use docsign_core::{DocumentId, UserId};
use std::path::PathBuf;
use tracing::info;

use crate::error::CliResult;
use crate::CliContext;

/// Document lifecycle as seen by the signing subsystem
#[derive(Subcommand, Debug, Clone)]
pub enum DocumentCmd {
    /// Register (or replace) a document and its creator
    Register(RegisterArgs),

    /// Assign the completer and run the completion follow-ups
    Complete(CompleteArgs),

    /// Show the signer quorum of a document
    Status(DocumentArgs),

    /// Show one display row per signature
    Sheet(DocumentArgs),

    /// Export the signed bundle of a fully signed document
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[arg(long)]
    pub id: DocumentId,

    /// User who created the document
    #[arg(long)]
    pub creator: UserId,

    /// File holding the document bytes
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CompleteArgs {
    #[arg(long)]
    pub id: DocumentId,

    /// User who completed the workflow
    #[arg(long)]
    pub completer: UserId,
}

#[derive(Args, Debug, Clone)]
pub struct DocumentArgs {
    #[arg(long)]
    pub id: DocumentId,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long)]
    pub id: DocumentId,

    /// Write the bundle here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn handle_document_command(ctx: &CliContext, cmd: &DocumentCmd) -> CliResult {
    match cmd {
        DocumentCmd::Register(args) => {
            let content = tokio::fs::read(&args.file).await?;
            let size = content.len();
            ctx.store.register_document(args.id, args.creator, content).await?;
            info!(document_id = %args.id, creator = %args.creator, size, "Registered document");
            println!("Registered document {} ({} bytes)", args.id, size);
            Ok(())
        }
        DocumentCmd::Complete(args) => {
            ctx.store.set_completer(args.id, args.completer).await?;
            let actions = ctx.service.document_completed(args.id).await?;
            ctx.print_json(&actions)
        }
        DocumentCmd::Status(args) => {
            let report = ctx.service.report(args.id).await?;
            ctx.print_json(&report)
        }
        DocumentCmd::Sheet(args) => {
            let rows = ctx.service.signature_sheet(args.id).await?;
            ctx.print_json(&rows)
        }
        DocumentCmd::Export(args) => {
            let bundle = ctx.service.export_bundle(args.id).await?;
            match &args.output {
                Some(path) => {
                    tokio::fs::write(path, serde_json::to_vec_pretty(&bundle)?).await?;
                    println!("Bundle for document {} written to {}", args.id, path.display());
                    Ok(())
                }
                None => ctx.print_json(&bundle),
            }
        }
    }
}

/// Role assignments
#[derive(Subcommand, Debug, Clone)]
pub enum DirectorsCmd {
    /// Replace the set of users holding the director role
    Set {
        /// Director user ids
        #[arg(required = true)]
        users: Vec<UserId>,
    },
}

pub async fn handle_directors_command(ctx: &CliContext, cmd: &DirectorsCmd) -> CliResult {
    match cmd {
        DirectorsCmd::Set { users } => {
            ctx.store.set_directors(users.clone()).await?;
            println!("Director role now held by {} user(s)", users.len());
            Ok(())
        }
    }
}
