//! Printable implementations for nf_tables objects.

use std::io::Write;

use serde_json::json;

use crate::nftables::types::hook_name;
use crate::nftables::{Chain, Object, Rule, Ruleset, Set, SetElement, Table};

use super::{OutputOptions, Printable};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn policy_name(policy: u32) -> &'static str {
    match policy {
        0 => "drop",
        1 => "accept",
        _ => "unknown",
    }
}

fn element_text(element: &SetElement) -> String {
    match &element.data {
        Some(data) => format!("{} : {}", hex(&element.key), hex(data)),
        None => hex(&element.key),
    }
}

fn write_handle<W: Write>(
    w: &mut W,
    handle: Option<u64>,
    opts: &OutputOptions,
) -> std::io::Result<()> {
    if let (true, Some(handle)) = (opts.handles, handle) {
        write!(w, " # handle {}", handle)?;
    }
    Ok(())
}

/// `type filter hook input priority 0; policy accept;`
fn chain_spec(chain: &Chain, opts: &OutputOptions) -> Option<String> {
    let hook = chain.hook.as_ref()?;
    let hook_str = if opts.numeric {
        hook.hooknum.to_string()
    } else {
        hook_name(chain.family, hook.hooknum).to_string()
    };
    let mut spec = format!(
        "type {} hook {}",
        chain.chain_type.as_deref().unwrap_or("filter"),
        hook_str
    );
    if let Some(device) = &hook.device {
        spec.push_str(&format!(" device \"{}\"", device));
    }
    spec.push_str(&format!(" priority {};", hook.priority));
    if let Some(policy) = chain.policy {
        if opts.numeric {
            spec.push_str(&format!(" policy {};", policy));
        } else {
            spec.push_str(&format!(" policy {};", policy_name(policy)));
        }
    }
    Some(spec)
}

fn set_spec(set: &Set) -> String {
    let mut spec = format!("type {}", set.key_type.unwrap_or_default());
    if let Some(data_type) = set.data_type {
        spec.push_str(&format!(" : {}", data_type));
    }
    if let Some(flags) = set.flags.filter(|f| *f != 0) {
        spec.push_str(&format!("; flags {:#x}", flags));
    }
    spec
}

fn rule_text(rule: &Rule) -> String {
    format!("expressions {} bytes", rule.expressions.len())
}

impl Printable for Table {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        write!(w, "table {} {}", self.family, self.name)?;
        write_handle(w, self.handle, opts)?;
        writeln!(w)
    }

    fn to_json(&self) -> serde_json::Value {
        let mut obj = json!({
            "family": self.family.name(),
            "name": self.name,
        });
        if let Some(handle) = self.handle {
            obj["handle"] = json!(handle);
        }
        if let Some(flags) = self.flags {
            obj["flags"] = json!(flags);
        }
        json!({ "table": obj })
    }
}

impl Printable for Chain {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        write!(w, "chain {} {} {}", self.family, self.table, self.name)?;
        if let Some(spec) = chain_spec(self, opts) {
            write!(w, " {{ {} }}", spec)?;
        }
        write_handle(w, self.handle, opts)?;
        writeln!(w)
    }

    fn to_json(&self) -> serde_json::Value {
        let mut obj = json!({
            "family": self.family.name(),
            "table": self.table,
            "name": self.name,
        });
        if let Some(handle) = self.handle {
            obj["handle"] = json!(handle);
        }
        if let Some(hook) = &self.hook {
            obj["type"] = json!(self.chain_type.as_deref().unwrap_or("filter"));
            obj["hook"] = json!(hook_name(self.family, hook.hooknum));
            obj["prio"] = json!(hook.priority);
            if let Some(device) = &hook.device {
                obj["dev"] = json!(device);
            }
        }
        if let Some(policy) = self.policy {
            obj["policy"] = json!(policy_name(policy));
        }
        json!({ "chain": obj })
    }
}

impl Printable for Rule {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        write!(
            w,
            "rule {} {} {} {}",
            self.family,
            self.table,
            self.chain,
            rule_text(self)
        )?;
        write_handle(w, self.handle, opts)?;
        writeln!(w)
    }

    fn to_json(&self) -> serde_json::Value {
        let mut obj = json!({
            "family": self.family.name(),
            "table": self.table,
            "chain": self.chain,
            "expr": hex(&self.expressions),
        });
        if let Some(handle) = self.handle {
            obj["handle"] = json!(handle);
        }
        json!({ "rule": obj })
    }
}

impl Printable for Set {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        write!(
            w,
            "{} {} {} {} {{ {}",
            if self.is_map() { "map" } else { "set" },
            self.family,
            self.table,
            self.name,
            set_spec(self)
        )?;
        if !self.elements.is_empty() {
            let elements: Vec<_> = self.elements.iter().map(element_text).collect();
            write!(w, "; elements = {{ {} }}", elements.join(", "))?;
        }
        write!(w, " }}")?;
        write_handle(w, self.handle, opts)?;
        writeln!(w)
    }

    fn to_json(&self) -> serde_json::Value {
        let mut obj = json!({
            "family": self.family.name(),
            "table": self.table,
            "name": self.name,
        });
        if let Some(handle) = self.handle {
            obj["handle"] = json!(handle);
        }
        if let Some(key_type) = self.key_type {
            obj["type"] = json!(key_type);
        }
        if let Some(data_type) = self.data_type {
            obj["map"] = json!(data_type);
        }
        if let Some(flags) = self.flags {
            obj["flags"] = json!(flags);
        }
        if !self.elements.is_empty() {
            obj["elem"] = json!(self.elements.iter().map(element_text).collect::<Vec<_>>());
        }
        let key = if self.is_map() { "map" } else { "set" };
        json!({ key: obj })
    }
}

impl Printable for Object {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        write!(
            w,
            "{} {} {} {}",
            self.type_name(),
            self.family,
            self.table,
            self.name
        )?;
        write_handle(w, self.handle, opts)?;
        writeln!(w)
    }

    fn to_json(&self) -> serde_json::Value {
        let mut obj = json!({
            "family": self.family.name(),
            "table": self.table,
            "name": self.name,
            "data": hex(&self.data),
        });
        if let Some(handle) = self.handle {
            obj["handle"] = json!(handle);
        }
        json!({ self.type_name(): obj })
    }
}

impl Printable for Ruleset {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        for table in &self.tables {
            write!(w, "table {} {} {{", table.family, table.name)?;
            write_handle(w, table.handle, opts)?;
            writeln!(w)?;

            for set in self.sets_of(table) {
                write!(w, "\t{} {} {{", if set.is_map() { "map" } else { "set" }, set.name)?;
                write_handle(w, set.handle, opts)?;
                writeln!(w)?;
                writeln!(w, "\t\t{}", set_spec(set))?;
                if !set.elements.is_empty() {
                    let elements: Vec<_> = set.elements.iter().map(element_text).collect();
                    writeln!(w, "\t\telements = {{ {} }}", elements.join(", "))?;
                }
                writeln!(w, "\t}}")?;
                writeln!(w)?;
            }

            let mut first = true;
            for chain in self.chains_of(table) {
                if !first {
                    writeln!(w)?;
                }
                first = false;
                write!(w, "\tchain {} {{", chain.name)?;
                write_handle(w, chain.handle, opts)?;
                writeln!(w)?;
                if let Some(spec) = chain_spec(chain, opts) {
                    writeln!(w, "\t\t{}", spec)?;
                }
                for rule in self.rules_of(chain) {
                    write!(w, "\t\t{}", rule_text(rule))?;
                    write_handle(w, rule.handle, opts)?;
                    writeln!(w)?;
                }
                writeln!(w, "\t}}")?;
            }
            writeln!(w, "}}")?;
        }
        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        let items: Vec<_> = self
            .tables
            .iter()
            .map(Printable::to_json)
            .chain(self.chains.iter().map(Printable::to_json))
            .chain(self.sets.iter().map(Printable::to_json))
            .chain(self.rules.iter().map(Printable::to_json))
            .collect();
        json!({ "nftables": items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nftables::Family;

    fn text<P: Printable>(p: &P, opts: &OutputOptions) -> String {
        let mut out = Vec::new();
        p.print_text(&mut out, opts).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn table_line() {
        let table = Table::new(Family::Inet, "filter").with_handle(3);
        assert_eq!(text(&table, &OutputOptions::default()), "table inet filter\n");
        let opts = OutputOptions {
            handles: true,
            ..Default::default()
        };
        assert_eq!(text(&table, &opts), "table inet filter # handle 3\n");
        assert_eq!(table.to_json()["table"]["name"], "filter");
    }

    #[test]
    fn base_chain_spec() {
        let chain = Chain::new(Family::Ip, "filter", "input")
            .with_hook("filter", 1, 0)
            .with_policy(0);
        assert_eq!(
            text(&chain, &OutputOptions::default()),
            "chain ip filter input { type filter hook input priority 0; policy drop; }\n"
        );
        assert_eq!(chain.to_json()["chain"]["hook"], "input");
    }

    #[test]
    fn nested_ruleset() {
        let table = Table::new(Family::Inet, "t");
        let ruleset = Ruleset {
            tables: vec![table],
            chains: vec![Chain::new(Family::Inet, "t", "c")],
            sets: vec![
                Set::new(Family::Inet, "t", "s")
                    .with_key(7, 4)
                    .with_element(SetElement::new([10, 0, 0, 1])),
            ],
            rules: vec![Rule::new(Family::Inet, "t", "c").with_expressions([0u8; 8])],
        };
        let out = text(&ruleset, &OutputOptions::default());
        assert!(out.starts_with("table inet t {\n"));
        assert!(out.contains("\t\telements = { 0a000001 }\n"));
        assert!(out.contains("\tchain c {\n\t\texpressions 8 bytes\n\t}\n"));

        let json = ruleset.to_json();
        assert_eq!(json["nftables"].as_array().map(Vec::len), Some(4));
    }
}
