mod board_config;
mod board_controllers;
mod board_filters;
mod board_models;
mod board_views;

use anyhow::Context;
use board_config::BoardConfig;
use board_controllers::BoardControllers;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\nThe board encountered an unexpected error:");
        eprintln!("{}", panic_info);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Please restart the board");
        eprintln!("  • Check your internet connection");
        eprintln!("  • Run with RUST_LOG=debug for more detail");
        eprintln!("\n{}", "═".repeat(70));
    }));

    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = BoardConfig::parse();
    config.validate().context("Invalid board configuration")?;

    BoardControllers::run(&config)
        .await
        .context("Bus board stopped")?;

    Ok(())
}
