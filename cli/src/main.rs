use clap::Parser;
use sb_shovel::app;
use sb_shovel::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = app::run(cli).await {
        log::error!("sb-shovel failed: {e}");
        println!("{e}");
        std::process::exit(e.exit_code());
    }
}
