use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use agegate::commands::{self, extract, verify, CommandError};
use agegate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "agegate",
    version,
    about = "Read a birth date from an ID photo or typed text and check an age threshold"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read a typed date of birth
    Text {
        /// Free text containing the date, e.g. "2001/07/15"
        text: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Recognize the date of birth on a document photo
    Image {
        path: PathBuf,

        /// Blank this fraction of the image, from the top, before recognition
        #[arg(long, value_parser = commands::parse_fraction)]
        mask_top: Option<f32>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Full flow: document photo first, typed entry on stdin as fallback
    Verify {
        path: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Reference date for age calculation (YYYY-MM-DD); defaults to today
    #[arg(long, value_parser = commands::parse_today)]
    today: Option<NaiveDate>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    agegate::init_tracing();

    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    match dispatch(&config, cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn dispatch(config: &AppConfig, command: Commands) -> Result<bool, CommandError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let granted = match command {
        Commands::Text { text, common } => {
            extract::run_text(config, &text, common.today, common.json, &mut out)?
        }
        Commands::Image {
            path,
            mask_top,
            common,
        } => extract::run_image(config, &path, mask_top, common.today, common.json, &mut out)?,
        Commands::Verify { path, common } => {
            drop(out);
            return verify::run_verify(config, &path, common.today, common.json);
        }
    };

    out.flush()?;
    Ok(granted)
}
