use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledger-node")]
pub struct Opt {
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "keygen", about = "Generate a new ECDSA P-256 key")]
    Keygen,
    #[command(name = "mine", about = "Mine blocks onto the local chain")]
    Mine {
        #[arg(long, default_value_t = 1, help = "Number of blocks to mine")]
        blocks: u64,
    },
    #[command(name = "status", about = "Rebuild chain state and print a summary")]
    Status,
    #[command(name = "balance", about = "Sum the outputs locked to a public-key hash")]
    Balance {
        #[arg(help = "Public-key hash in hex")]
        pub_key_hash: String,
    },
    #[command(name = "print-chain", about = "Print every header as JSON")]
    PrintChain,
}
