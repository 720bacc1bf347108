// src/main.rs

use wavesched::errors::WaveError;
use wavesched::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("wavesched: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run_main() -> Result<(), WaveError> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
