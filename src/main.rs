use std::fs::{self, File};
use std::io::{Write, stdout};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use rifagen::export::{resolve_output_path, write_document};
use rifagen::panic_handler::{flush_output, initialize_panic_handler};
use rifagen::settings::{self, Settings};
use rifagen::{Dispatcher, Progress, RaffleDetails, StatusMessage};

/// CLI Arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Generate printable raffle ticket sheets as PDF")]
struct Cli {
    /// Number of pages to generate (five tickets per page)
    #[arg(short, long)]
    pages: u32,

    /// Organizer name printed at the top of every ticket
    #[arg(long)]
    organization: String,

    /// Raffle name
    #[arg(long)]
    raffle: String,

    /// Ticket price, printed inside the badge
    #[arg(long)]
    price: String,

    #[arg(long, default_value = "")]
    first_prize: String,

    #[arg(long, default_value = "")]
    second_prize: String,

    #[arg(long, default_value = "")]
    third_prize: String,

    /// PNG logo printed in the top-right corner of every ticket
    #[arg(long)]
    logo: PathBuf,

    /// Output file (defaults to "Rifas #<timestamp>.pdf")
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of rendering units (defaults to one per core)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Page raster resolution
    #[arg(long)]
    dpi: Option<f32>,

    /// Do not print the faint ticket number across each card
    #[arg(long)]
    no_watermark: bool,

    /// TrueType/OpenType font to use instead of the system serif
    #[arg(long)]
    font: Option<PathBuf>,

    /// Settings file (defaults to the per-user config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print progress and completion as JSON lines
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "rifagen.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(dpi) = self.dpi {
            settings.dpi = dpi;
        }
        if self.workers.is_some() {
            settings.workers = self.workers;
        }
        if self.no_watermark {
            settings.watermark = false;
        }
        if let Some(font) = &self.font {
            settings.font_path = Some(font.clone());
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("Failed to create log file {}", cli.log_file.display()))?,
    )?;
    initialize_panic_handler();

    info!("Starting rifagen");
    let result = run(&cli);
    if let Err(err) = &result {
        error!("Generation failed: {err:?}");
    }
    info!("Shutting down rifagen");
    result
}

fn run(cli: &Cli) -> Result<()> {
    if let Err(e) = settings::load_settings(cli.config.as_deref()) {
        if cli.config.is_some() {
            return Err(e).context("Failed to load settings");
        }
        warn!("Using default settings: {e}");
    }
    let mut settings = settings::current();
    cli.apply_overrides(&mut settings);

    let logo = fs::read(&cli.logo)
        .with_context(|| format!("Failed to read logo {}", cli.logo.display()))?;
    let font: Option<Arc<[u8]>> = match &settings.font_path {
        Some(path) => Some(
            fs::read(path)
                .with_context(|| format!("Failed to read font {}", path.display()))?
                .into(),
        ),
        None => None,
    };

    let mut config = settings.dispatch_config();
    config.render.font = font;

    let details = RaffleDetails {
        quantity: cli.pages,
        organization_name: cli.organization.clone(),
        raffle_name: cli.raffle.clone(),
        first_prize: cli.first_prize.clone(),
        second_prize: cli.second_prize.clone(),
        third_prize: cli.third_prize.clone(),
        price: cli.price.clone(),
        logo,
    };

    let dispatcher = Dispatcher::new(config);
    let document = dispatcher
        .dispatch(details, |progress| report_progress(progress, cli.json))
        .context("Failed to render raffle sheets")?;
    if !cli.json {
        flush_output();
    }

    let path = resolve_output_path(
        cli.output.as_deref(),
        settings.output_dir.as_deref(),
        Utc::now(),
    );
    let written = write_document(&path, &document.bytes)?;

    let complete = StatusMessage::Complete {
        page_count: document.page_count(),
        document_bytes: document.bytes.len(),
    };
    if cli.json {
        print_json(&complete)?;
    } else {
        println!(
            "Wrote {} pages ({} tickets) to {}",
            document.page_count(),
            document.tickets().count(),
            written.display()
        );
    }
    Ok(())
}

fn report_progress(progress: &Progress, json: bool) {
    if json {
        for message in [progress.percent_message(), progress.ticket_count_message()] {
            if let Err(e) = print_json(&message) {
                warn!("Dropped progress message: {e}");
            }
        }
    } else {
        let mut out = stdout();
        let _ = write!(
            out,
            "\rProgress: {:>3}% ({}/{} tickets)",
            progress.percent, progress.tickets_rendered, progress.tickets_total
        );
        let _ = out.flush();
    }
}

fn print_json(message: &StatusMessage) -> Result<()> {
    let line = serde_json::to_string(message)?;
    println!("{line}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_replace_settings() {
        let cli = Cli::parse_from([
            "rifagen",
            "--pages",
            "3",
            "--organization",
            "Club X",
            "--raffle",
            "Rifa Anual",
            "--price",
            "$10",
            "--logo",
            "logo.png",
            "--dpi",
            "150",
            "--workers",
            "2",
            "--no-watermark",
        ]);
        let mut settings = Settings::default();
        cli.apply_overrides(&mut settings);

        assert_eq!(settings.dpi, 150.0);
        assert_eq!(settings.workers, Some(2));
        assert!(!settings.watermark);
        assert!(settings.font_path.is_none());
        assert_eq!(cli.first_prize, "");
    }
}
