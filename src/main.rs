use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dhcpd_leases::{Config, LeaseStore, MalformedPolicy, Report, ReportKind, Result};

#[derive(Parser)]
#[command(name = "dhcpd-leases")]
#[command(author, version, about = "Report current leases from an ISC dhcpd lease file", long_about = None)]
struct Cli {
    /// Show abandoned leases instead of active ones
    #[arg(short, long, conflicts_with = "static_only")]
    abandoned: bool,

    /// Show only static active leases
    #[arg(short = 's', long = "static")]
    static_only: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Skip lease blocks with a malformed `ends` value instead of failing
    #[arg(long)]
    skip_malformed: bool,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Lease file to read (defaults to /var/lib/dhcp/dhcpd.leases)
    file: Option<PathBuf>,
}

impl Cli {
    fn report_kind(&self) -> ReportKind {
        if self.abandoned {
            ReportKind::Abandoned
        } else if self.static_only {
            ReportKind::Static
        } else {
            ReportKind::Active
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(file) = &cli.file {
        config.leases_file = file.clone();
    }
    if cli.skip_malformed {
        config.on_malformed = MalformedPolicy::Skip;
    }
    config.validate()?;
    debug!(?config, "effective configuration");

    let store = LeaseStore::load(&config.leases_file, config.on_malformed).await?;
    let now = Utc::now();
    let report = Report::build(&store, cli.report_kind(), now);

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text(&config.hardware_placeholder));
    }

    Ok(())
}
