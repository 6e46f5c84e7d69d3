use clap::Parser;
use devtool::cli::{Cli, log_filter};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .format_timestamp_millis()
    .init();

    let code = devtool::commands::run(cli).await;
    std::process::exit(code);
}
