//! hermit entry point

use clap::Parser;
use hermit::cli::{Cli, Commands};
use hermit::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let paths = match cli.paths() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let log_guard = match logging::init(&paths.log_dir()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: failed to initialize logging: {}", e);
            None
        }
    };

    let result = match &cli.command {
        Some(Commands::Stop(args)) => hermit::cli::stop::execute(args, paths).await,
        Some(Commands::Status(args)) => hermit::cli::status::execute(args, paths).await,
        Some(Commands::Logs(args)) => hermit::cli::logs::execute(args, paths).await,
        None => hermit::cli::run::execute(&cli.run, paths).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        drop(log_guard);
        std::process::exit(1);
    }
}
