use std::process;

use tracing::Level;

mod headless;
mod logging;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let parsed = match headless::parse_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("error: {err}");
            headless::print_help();
            process::exit(2);
        }
    };

    let level = if parsed.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logging::setup_tracing(level);

    tracing::info!("procgraph starting");

    if let Err(err) = headless::run(&parsed) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
