//! nft monitor - watch ruleset changes.

use clap::{Args, ValueEnum};
use nftlink::output::{
    MonitorConfig, OutputFormat, OutputOptions, print_event, print_monitor_start,
};
use nftlink::{Control, NftEvent, Result, Session};

/// Object kinds that can be watched.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EventType {
    Tables,
    Chains,
    Rules,
    Sets,
    Elements,
    Objects,
    /// Transaction boundaries (new generation).
    Gen,
    /// Everything.
    All,
}

impl EventType {
    fn matches(self, event: &NftEvent) -> bool {
        match self {
            EventType::All => true,
            EventType::Tables => event.kind() == "table",
            EventType::Chains => event.kind() == "chain",
            EventType::Rules => event.kind() == "rule",
            EventType::Sets => event.kind() == "set",
            EventType::Elements => event.kind() == "element",
            EventType::Objects => event.kind() == "object",
            EventType::Gen => event.kind() == "generation",
        }
    }
}

#[derive(Args)]
pub struct MonitorCmd {
    /// Object kinds to watch.
    #[arg(default_value = "all")]
    objects: Vec<EventType>,

    /// Label output lines with event timestamps.
    #[arg(short = 't', long)]
    timestamp: bool,
}

impl MonitorCmd {
    pub async fn run(
        &self,
        session: &mut Session,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> Result<()> {
        let config = MonitorConfig::new()
            .with_timestamp(self.timestamp)
            .with_format(format)
            .with_opts(*opts);

        session.subscribe_events()?;

        let mut stdout = std::io::stdout().lock();
        print_monitor_start(
            &mut stdout,
            &config,
            "Monitoring nf_tables events (Ctrl+C to stop)...",
        )?;

        let mut write_error = None;
        session
            .listen_events(|event| {
                if !self.objects.iter().any(|o| o.matches(&event)) {
                    return Control::Continue;
                }
                match print_event(&mut stdout, &event, &config) {
                    Ok(()) => Control::Continue,
                    Err(e) => {
                        write_error = Some(e);
                        Control::Stop
                    }
                }
            })
            .await?;

        match write_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
