use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cmd;

use clap::Parser;

/// entry point for `magsql ask` and `magsql batch`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cmd::Cli::parse().execute().await
}
