//! Whole-ruleset snapshots.

use crate::netlink::{Result, Transport};

use super::objects::{Chain, Rule, Set, Table};
use super::session::Session;
use super::types::Family;

/// Every table, chain, set (with elements) and rule of a family, read
/// against a single ruleset generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct Ruleset {
    pub tables: Vec<Table>,
    pub chains: Vec<Chain>,
    pub sets: Vec<Set>,
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Check whether nothing was read.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.chains.is_empty()
            && self.sets.is_empty()
            && self.rules.is_empty()
    }

    /// Chains of one table.
    pub fn chains_of<'a>(&'a self, table: &'a Table) -> impl Iterator<Item = &'a Chain> + 'a {
        self.chains
            .iter()
            .filter(move |c| c.family == table.family && c.table == table.name)
    }

    /// Sets of one table.
    pub fn sets_of<'a>(&'a self, table: &'a Table) -> impl Iterator<Item = &'a Set> + 'a {
        self.sets
            .iter()
            .filter(move |s| s.family == table.family && s.table == table.name)
    }

    /// Rules of one chain, in kernel order.
    pub fn rules_of<'a>(&'a self, chain: &'a Chain) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| {
            r.family == chain.family && r.table == chain.table && r.chain == chain.name
        })
    }
}

impl<T: Transport> Session<T> {
    /// Read the complete ruleset of `family` (`Family::Unspec` for all).
    ///
    /// Takes a fresh generation baseline first, so a concurrent change
    /// anywhere in the read fails the whole snapshot with a retryable
    /// error instead of returning a mix of two rulesets.
    pub async fn ruleset(&mut self, family: Family) -> Result<Ruleset> {
        self.refresh_generation().await?;

        let tables = self.dump_tables(family).await?;
        let chains = self.dump_chains(family).await?;
        let mut sets = self.dump_sets(family, None).await?;
        for set in &mut sets {
            self.get_set_elements(set).await?;
        }
        let rules = self.dump_rules(family).await?;

        tracing::debug!(
            tables = tables.len(),
            chains = chains.len(),
            sets = sets.len(),
            rules = rules.len(),
            generation = self.generation,
            "ruleset snapshot complete"
        );

        Ok(Ruleset {
            tables,
            chains,
            sets,
            rules,
        })
    }
}
