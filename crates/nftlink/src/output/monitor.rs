//! Output helpers for `nft monitor` style event printing.
//!
//! # Example
//!
//! ```ignore
//! use nftlink::output::{MonitorConfig, OutputFormat, print_event};
//! use nftlink::{Control, Session};
//!
//! let config = MonitorConfig::new()
//!     .with_timestamp(true)
//!     .with_format(OutputFormat::Text);
//!
//! let mut session = Session::new()?;
//! session.subscribe_events()?;
//! let mut stdout = std::io::stdout().lock();
//! session
//!     .listen_events(|event| match print_event(&mut stdout, &event, &config) {
//!         Ok(()) => Control::Continue,
//!         Err(_) => Control::Stop,
//!     })
//!     .await?;
//! ```

use super::{OutputFormat, OutputOptions, Printable};
use crate::nftables::{NftEvent, SetElementList};
use std::io::{self, Write};
use std::time::SystemTime;

/// Configuration for monitor output.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// Whether to prefix output with timestamps.
    pub timestamp: bool,
    /// Output format (text or JSON).
    pub format: OutputFormat,
    /// Output options.
    pub opts: OutputOptions,
}

impl MonitorConfig {
    /// Create a new monitor config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable timestamp prefixes.
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output options.
    pub fn with_opts(mut self, opts: OutputOptions) -> Self {
        self.opts = opts;
        self
    }
}

/// Write a timestamp prefix to the output if enabled.
///
/// Format: `[seconds.milliseconds] `
pub fn write_timestamp<W: Write>(w: &mut W, config: &MonitorConfig) -> io::Result<()> {
    if config.timestamp {
        let now = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        write!(w, "[{}.{:03}] ", now.as_secs(), now.subsec_millis())?;
    }
    Ok(())
}

/// Event types that can be printed in monitor mode.
pub trait MonitorEvent {
    /// Print the event in text format.
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> io::Result<()>;

    /// Convert the event to a JSON value.
    fn to_json(&self) -> serde_json::Value;
}

/// Print a monitor event using the configured format.
pub fn print_event<W, E>(w: &mut W, event: &E, config: &MonitorConfig) -> io::Result<()>
where
    W: Write,
    E: MonitorEvent,
{
    write_timestamp(w, config)?;

    match config.format {
        OutputFormat::Text => {
            event.print_text(w, &config.opts)?;
        }
        OutputFormat::Json => {
            let json = event.to_json();
            writeln!(w, "{}", serde_json::to_string(&json).unwrap_or_default())?;
        }
    }

    w.flush()?;
    Ok(())
}

/// Print a startup message for monitor mode (text format only).
pub fn print_monitor_start<W: Write>(
    w: &mut W,
    config: &MonitorConfig,
    message: &str,
) -> io::Result<()> {
    if config.format == OutputFormat::Text {
        writeln!(w, "{}", message)?;
    }
    Ok(())
}

fn elements_text(list: &SetElementList) -> String {
    list.elements
        .iter()
        .map(|e| {
            let key: String = e.key.iter().map(|b| format!("{:02x}", b)).collect();
            match &e.data {
                Some(data) => {
                    let data: String = data.iter().map(|b| format!("{:02x}", b)).collect();
                    format!("{} : {}", key, data)
                }
                None => key,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl MonitorEvent for NftEvent {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> io::Result<()> {
        match self {
            NftEvent::NewGen {
                generation,
                pid,
                process,
            } => {
                write!(w, "# new generation {}", generation)?;
                if let Some(pid) = pid {
                    write!(w, " by process {}", pid)?;
                    if let Some(process) = process {
                        write!(w, " ({})", process)?;
                    }
                }
                writeln!(w)
            }
            NftEvent::NewSetElem(list) | NftEvent::DelSetElem(list) => writeln!(
                w,
                "{} element {} {} {} {{ {} }}",
                self.action(),
                list.family,
                list.table,
                list.set,
                elements_text(list)
            ),
            _ => {
                write!(w, "{} ", self.action())?;
                match self {
                    NftEvent::NewTable(t) | NftEvent::DelTable(t) => t.print_text(w, opts),
                    NftEvent::NewChain(c) | NftEvent::DelChain(c) => c.print_text(w, opts),
                    NftEvent::NewRule(r) | NftEvent::DelRule(r) => r.print_text(w, opts),
                    NftEvent::NewSet(s) | NftEvent::DelSet(s) => s.print_text(w, opts),
                    NftEvent::NewObj(o) | NftEvent::DelObj(o) => o.print_text(w, opts),
                    _ => writeln!(w),
                }
            }
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let inner = match self {
            NftEvent::NewTable(t) | NftEvent::DelTable(t) => t.to_json(),
            NftEvent::NewChain(c) | NftEvent::DelChain(c) => c.to_json(),
            NftEvent::NewRule(r) | NftEvent::DelRule(r) => r.to_json(),
            NftEvent::NewSet(s) | NftEvent::DelSet(s) => s.to_json(),
            NftEvent::NewObj(o) | NftEvent::DelObj(o) => o.to_json(),
            NftEvent::NewSetElem(list) | NftEvent::DelSetElem(list) => serde_json::json!({
                "element": {
                    "family": list.family.name(),
                    "table": list.table,
                    "name": list.set,
                    "elem": elements_text(list),
                }
            }),
            NftEvent::NewGen {
                generation,
                pid,
                process,
            } => {
                return serde_json::json!({
                    "gen": {
                        "id": generation,
                        "pid": pid,
                        "process": process,
                    }
                });
            }
        };
        serde_json::json!({ self.action(): inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nftables::{Family, SetElement, Table};

    fn text(event: &NftEvent) -> String {
        let mut out = Vec::new();
        print_event(&mut out, event, &MonitorConfig::new()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn object_events() {
        let event = NftEvent::DelTable(Table::new(Family::Inet, "filter"));
        assert_eq!(text(&event), "delete table inet filter\n");
        assert_eq!(event.to_json()["delete"]["table"]["name"], "filter");
    }

    #[test]
    fn element_events() {
        let event = NftEvent::NewSetElem(SetElementList {
            family: Family::Ip,
            table: "t".into(),
            set: "s".into(),
            elements: vec![SetElement::new([1, 2])],
        });
        assert_eq!(text(&event), "add element ip t s { 0102 }\n");
    }

    #[test]
    fn generation_events() {
        let event = NftEvent::NewGen {
            generation: 7,
            pid: Some(99),
            process: Some("nft".into()),
        };
        assert_eq!(text(&event), "# new generation 7 by process 99 (nft)\n");
        assert_eq!(event.to_json()["gen"]["id"], 7);
    }

    #[test]
    fn json_lines() {
        let config = MonitorConfig::new().with_format(OutputFormat::Json);
        let mut out = Vec::new();
        print_event(&mut out, &NftEvent::NewTable(Table::new(Family::Ip, "t")), &config).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["add"]["table"]["family"], "ip");

        let mut start = Vec::new();
        print_monitor_start(&mut start, &config, "listening").unwrap();
        assert!(start.is_empty());
    }
}
