//! docsign command-line front end over the SQLite signing store.

pub mod cli;
pub mod commands;
pub mod context;
pub mod error;

pub use cli::{Cli, Commands, GlobalOpts};
pub use context::CliContext;
pub use error::{CliError, CliResult};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber on stderr. `RUST_LOG` wins over the config
/// filter; `-v` raises the config filter to debug.
pub fn init_tracing(config_filter: &str, verbose: u8) {
    let fallback = if verbose > 0 { "debug" } else { config_filter };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    // A second init (tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Main library entry point.
pub async fn run(cli: Cli) -> CliResult<()> {
    let config = docsign_config::resolve_config(cli.global_opts.config.as_deref())?;
    init_tracing(&config.logging.filter, cli.global_opts.verbose);

    let ctx = CliContext::new(&config, &cli.global_opts)?;

    match &cli.command {
        Commands::Document(cmd) => commands::handle_document_command(&ctx, cmd).await?,
        Commands::Directors(cmd) => commands::handle_directors_command(&ctx, cmd).await?,
        Commands::Template(cmd) => commands::handle_template_command(&ctx, cmd).await?,
        Commands::Sign(args) => commands::handle_sign(&ctx, args).await?,
        Commands::Verify(args) => commands::handle_verify(&ctx, args).await?,
        Commands::Identity(cmd) => commands::handle_identity_command(&ctx, cmd).await?,
    }

    Ok(())
}
