use chrono::Utc;
use clap::Args;
use docsign_core::{DocumentId, SignRequest, StatementChoice, TemplateId, UserId};
use serde_json::json;

use crate::error::CliResult;
use crate::CliContext;

#[derive(Args, Debug, Clone)]
pub struct SignArgs {
    #[arg(long)]
    pub document: DocumentId,

    /// Signing user
    #[arg(long)]
    pub user: UserId,

    /// User the signer acts on behalf of
    #[arg(long)]
    pub on_behalf_of: Option<UserId>,

    /// Free-text statement; wins over --template
    #[arg(long)]
    pub statement: Option<String>,

    /// Statement template id
    #[arg(long)]
    pub template: Option<TemplateId>,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(long)]
    pub document: DocumentId,

    #[arg(long)]
    pub user: UserId,
}

pub async fn handle_sign(ctx: &CliContext, args: &SignArgs) -> CliResult {
    let outcome = ctx
        .service
        .sign_document(SignRequest {
            document_id: args.document,
            signer_id: args.user,
            delegated_signer_id: args.on_behalf_of,
            statement: StatementChoice {
                custom_text: args.statement.clone(),
                template_id: args.template,
            },
        })
        .await?;

    let record = &outcome.record;
    ctx.print_json(&json!({
        "document_id": record.document_id,
        "signer_id": record.signer_id,
        "delegated_signer_id": record.delegated_signer_id,
        "signed_at": record.signed_at,
        "statement": record.statement_text,
        "certificate_serial": record.certificate_snapshot.serial_number,
        "mode": record.mode,
        "follow_up": outcome.action,
        "follow_up_error": outcome.follow_up_error,
    }))
}

pub async fn handle_verify(ctx: &CliContext, args: &VerifyArgs) -> CliResult {
    let valid = ctx.service.verify_signature(args.document, args.user, Utc::now()).await?;
    ctx.print_json(&json!({
        "document_id": args.document,
        "signer_id": args.user,
        "valid": valid,
    }))
}
