use clap::Subcommand;
use docsign_core::UserId;
use serde_json::json;

use crate::error::{CliError, CliResult};
use crate::CliContext;

#[derive(Subcommand, Debug, Clone)]
pub enum IdentityCmd {
    /// Show a user's certificate (never the key)
    Show {
        #[arg(long)]
        user: UserId,
    },
}

pub async fn handle_identity_command(ctx: &CliContext, cmd: &IdentityCmd) -> CliResult {
    match cmd {
        IdentityCmd::Show { user } => {
            let identity = ctx
                .service
                .identity(*user)
                .await?
                .ok_or_else(|| CliError::NotFound(format!("no signing identity for user {user}")))?;
            let cert = &identity.certificate;
            ctx.print_json(&json!({
                "user_id": identity.user_id,
                "subject": cert.subject,
                "serial_number": cert.serial_number,
                "not_before": cert.not_before,
                "not_after": cert.not_after,
                "thumbprint": cert.thumbprint,
                "created_at": identity.created_at,
            }))
        }
    }
}
