//! nft add/delete - table and chain changes, each committed as one batch.

use clap::{Args, Subcommand};
use nftlink::netlink::message::NLM_F_CREATE;
use nftlink::nftables::types::hook_number;
use nftlink::{Batch, Chain, Error, Family, Result, Session, Table};

/// `NFT_TABLE_F_DORMANT`
const TABLE_DORMANT: u32 = 0x1;

#[derive(Args)]
pub struct AddCmd {
    #[command(subcommand)]
    what: AddWhat,
}

#[derive(Subcommand)]
enum AddWhat {
    /// Add a table.
    Table {
        name: String,

        /// Create the table without registering its base chains.
        #[arg(long)]
        dormant: bool,
    },

    /// Add a chain; with --hook a base chain.
    Chain {
        table: String,
        name: String,

        /// Chain type (filter, nat, route).
        #[arg(long = "type", default_value = "filter")]
        chain_type: String,

        /// Hook name (prerouting, input, forward, output, postrouting, ingress).
        #[arg(long)]
        hook: Option<String>,

        /// Hook priority.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Base chain policy.
        #[arg(long, value_parser = ["accept", "drop"])]
        policy: Option<String>,
    },
}

#[derive(Args)]
pub struct DeleteCmd {
    #[command(subcommand)]
    what: DeleteWhat,
}

#[derive(Subcommand)]
enum DeleteWhat {
    /// Delete a table and everything in it.
    Table { name: String },

    /// Delete an empty chain.
    Chain { table: String, name: String },
}

impl AddCmd {
    pub async fn run(&self, session: &mut Session, family: Family) -> Result<()> {
        let family = concrete(family)?;
        let mut batch = Batch::new();
        batch.begin(session.next_seq());

        match &self.what {
            AddWhat::Table { name, dormant } => {
                let mut table = Table::new(family, name.as_str());
                if *dormant {
                    table = table.with_flags(TABLE_DORMANT);
                }
                batch.add_table(&table, NLM_F_CREATE, session.next_seq())?;
            }
            AddWhat::Chain {
                table,
                name,
                chain_type,
                hook,
                priority,
                policy,
            } => {
                let mut chain = Chain::new(family, table.as_str(), name.as_str());
                if let Some(hook) = hook {
                    let hooknum = hook_number(family, hook).ok_or_else(|| {
                        Error::InvalidMessage(format!("unknown hook '{}' for {}", hook, family))
                    })?;
                    chain = chain.with_hook(chain_type, hooknum, *priority);
                    if let Some(policy) = policy {
                        chain = chain.with_policy(u32::from(policy == "accept"));
                    }
                }
                batch.add_chain(&chain, 0, session.next_seq())?;
            }
        }

        batch.end(session.next_seq());
        commit(session, &batch).await
    }
}

impl DeleteCmd {
    pub async fn run(&self, session: &mut Session, family: Family) -> Result<()> {
        let family = concrete(family)?;
        let mut batch = Batch::new();
        batch.begin(session.next_seq());

        match &self.what {
            DeleteWhat::Table { name } => {
                batch.del_table(&Table::new(family, name.as_str()), session.next_seq())?;
            }
            DeleteWhat::Chain { table, name } => {
                let chain = Chain::new(family, table.as_str(), name.as_str());
                batch.del_chain(&chain, session.next_seq())?;
            }
        }

        batch.end(session.next_seq());
        commit(session, &batch).await
    }
}

fn concrete(family: Family) -> Result<Family> {
    match family {
        Family::Unspec => Err(Error::InvalidMessage(
            "a family is required, use -f".to_string(),
        )),
        family => Ok(family),
    }
}

/// Commit `batch` and report every rejected message on stderr.
async fn commit(session: &mut Session, batch: &Batch) -> Result<()> {
    let mut errors = Vec::new();
    let result = session.commit(batch, &mut errors).await;
    for pending in &errors {
        let cmd = batch
            .staged(pending.seq)
            .next()
            .map(|m| m.cmd.name())
            .unwrap_or("unknown");
        eprintln!("Error: {} ({})", pending, cmd);
    }
    result
}
