use clap::Parser;

mod cli;
mod demo;
mod serve;
mod stdio_host;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
