use clap::Parser;
use docsign_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.global_opts.verbose > 0;

    if let Err(e) = docsign_cli::run(cli).await {
        eprintln!("Error: {}", e.display_message(verbose));
        std::process::exit(e.exit_code());
    }
}
