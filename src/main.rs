use clap::Parser;
use tracing::Level;

use cartforge::cli::Cli;

fn main() {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cartforge::run(args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
