use clap::Parser;
use fanrelay::cli::Cli;

fn main() {
    let cli = Cli::parse();
    std::process::exit(fanrelay::run(cli));
}
