//! devex - installation orchestration CLI entry point.

use clap::Parser;

use devex_cli::{Cli, Commands, cmd, logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_dir = devex_core::Config::load().map(|c| c.log_dir()).unwrap_or_else(|_| std::path::PathBuf::from("logs"));
    logging::init(log_dir);

    let result = match cli.command {
        Commands::Install {
            apps,
            categories,
            dry_run,
            verbose,
            continue_on_error,
        } => cmd::install::run(&cli.catalog, &cli.platform, &apps, &categories, dry_run, verbose, continue_on_error).await,
        Commands::Uninstall { apps } => cmd::uninstall::run(&cli.catalog, &cli.platform, &apps).await,
        Commands::System { user } => cmd::system::run(user).await,
        Commands::Undo { target, force } => cmd::undo::run(&target, force).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            cmd::exit::FATAL
        }
    };

    std::process::exit(code);
}
