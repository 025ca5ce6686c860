//! nft list - show tables, chains, sets, rules and objects.

use clap::{Args, Subcommand};
use nftlink::output::{OutputFormat, OutputOptions, Printable, print_all};
use nftlink::{Family, ObjectFilter, Result, Session};

#[derive(Args)]
pub struct ListCmd {
    #[command(subcommand)]
    what: ListWhat,
}

#[derive(Subcommand)]
enum ListWhat {
    /// List tables.
    Tables,

    /// List chains.
    Chains,

    /// List sets and maps.
    Sets {
        /// Only sets of this table.
        table: Option<String>,

        /// Fetch the elements too.
        #[arg(short = 'e', long)]
        elements: bool,
    },

    /// List rules.
    Rules,

    /// List stateful objects.
    Objects {
        /// Only objects of this table.
        table: Option<String>,

        /// Reset counters while reading them.
        #[arg(long)]
        reset: bool,
    },

    /// List the whole ruleset.
    Ruleset,
}

impl ListCmd {
    pub async fn run(
        &self,
        session: &mut Session,
        family: Family,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> Result<()> {
        session.refresh_generation().await?;
        let mut stdout = std::io::stdout().lock();

        match &self.what {
            ListWhat::Tables => {
                let tables = session.dump_tables(family).await?;
                print_all(&mut stdout, &tables, format, opts)?;
            }
            ListWhat::Chains => {
                let chains = session.dump_chains(family).await?;
                print_all(&mut stdout, &chains, format, opts)?;
            }
            ListWhat::Sets { table, elements } => {
                let mut sets = session.dump_sets(family, table.as_deref()).await?;
                if *elements {
                    for set in &mut sets {
                        session.get_set_elements(set).await?;
                    }
                }
                print_all(&mut stdout, &sets, format, opts)?;
            }
            ListWhat::Rules => {
                let rules = session.dump_rules(family).await?;
                print_all(&mut stdout, &rules, format, opts)?;
            }
            ListWhat::Objects { table, reset } => {
                let mut filter = ObjectFilter::all().reset(*reset);
                if let Some(table) = table {
                    filter = filter.table(table.as_str());
                }
                let objects = session.dump_objects(family, &filter).await?;
                print_all(&mut stdout, &objects, format, opts)?;
            }
            ListWhat::Ruleset => {
                let ruleset = session.ruleset(family).await?;
                ruleset.print(&mut stdout, format, opts)?;
            }
        }

        Ok(())
    }
}
