use clap::Parser;
use poct_audit::cli::{CliError, is_json_mode_args};

fn main() -> anyhow::Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let raw_args: Vec<String> = std::env::args().collect();
    let cli = match poct_audit::Cli::try_parse_from(&raw_args) {
        Ok(cli) => cli,
        // Help and version output go through clap unchanged.
        Err(err) if err.use_stderr() && is_json_mode_args(&raw_args) => {
            let err = CliError::usage(&err);
            eprintln!("{}", err.to_json());
            std::process::exit(err.code);
        }
        Err(err) => err.exit(),
    };
    poct_audit::cli::init_tracing(cli.verbose);
    let json = cli.json;

    if let Err(err) = poct_audit::cli::run(cli) {
        if json {
            eprintln!("{}", err.to_json());
        } else {
            eprintln!("{err}");
        }
        std::process::exit(err.code);
    }
    Ok(())
}
