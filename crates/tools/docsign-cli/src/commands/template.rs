use clap::Subcommand;
use docsign_core::{StatementTemplate, TemplateId};

use crate::error::{CliError, CliResult};
use crate::CliContext;

/// Statement templates attached to delegated signatures
#[derive(Subcommand, Debug, Clone)]
pub enum TemplateCmd {
    /// Add or replace a template
    Add {
        #[arg(long)]
        id: TemplateId,

        #[arg(long)]
        text: String,
    },

    /// List all templates
    List,
}

pub async fn handle_template_command(ctx: &CliContext, cmd: &TemplateCmd) -> CliResult {
    match cmd {
        TemplateCmd::Add { id, text } => {
            let text = text.trim();
            if text.is_empty() {
                return Err(CliError::Input("template text must not be blank".to_string()));
            }
            ctx.store
                .add_template(StatementTemplate {
                    template_id: *id,
                    text: text.to_string(),
                })
                .await?;
            println!("Stored template {}", id);
            Ok(())
        }
        TemplateCmd::List => {
            let templates = ctx.service.statement_templates().await?;
            ctx.print_json(&templates)
        }
    }
}
