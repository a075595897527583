use branchwork::cli;
use branchwork::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::parse();

    // Initialize logging before anything else
    logging::init(cli.verbose)?;

    cli::run(cli).await
}
