//! nft command - nf_tables inspection, batch commits and monitoring.

mod commands;

use clap::{Parser, Subcommand};
use nftlink::output::{OutputFormat, OutputOptions};
use nftlink::{Family, Session, SessionConfig};

#[derive(Parser)]
#[command(name = "nft", version, about = "nf_tables netlink tool")]
struct Cli {
    /// Address family to operate on (ip, ip6, inet, arp, bridge, netdev).
    #[arg(short = 'f', long, default_value = "unspec")]
    family: Family,

    /// Output JSON.
    #[arg(short = 'j', long)]
    json: bool,

    /// Pretty print JSON.
    #[arg(short = 'p', long)]
    pretty: bool,

    /// Show object handles.
    #[arg(short = 'a', long)]
    handle: bool,

    /// Print hooks and policies as numbers.
    #[arg(short = 'n', long)]
    numeric: bool,

    /// Log at debug level and trace netlink messages.
    #[arg(short = 'd', long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List ruleset objects.
    #[command(visible_alias = "ls")]
    List(commands::list::ListCmd),

    /// Create objects in one transaction.
    Add(commands::table::AddCmd),

    /// Delete objects in one transaction.
    #[command(visible_alias = "del")]
    Delete(commands::table::DeleteCmd),

    /// Watch ruleset changes.
    #[command(visible_alias = "mon")]
    Monitor(commands::monitor::MonitorCmd),

    /// Check whether the kernel supports batched transactions.
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let opts = OutputOptions {
        handles: cli.handle,
        numeric: cli.numeric,
        pretty: cli.pretty,
    };

    let mut session = Session::with_config(
        nftlink::NetlinkSocket::new()?,
        SessionConfig::new().debug_netlink(cli.debug),
    )?;

    let result = match cli.command {
        Command::List(cmd) => cmd.run(&mut session, cli.family, format, &opts).await,
        Command::Add(cmd) => cmd.run(&mut session, cli.family).await,
        Command::Delete(cmd) => cmd.run(&mut session, cli.family).await,
        Command::Monitor(cmd) => cmd.run(&mut session, format, &opts).await,
        Command::Probe => commands::probe(&mut session, format).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
