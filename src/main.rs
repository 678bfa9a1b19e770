use clap::Parser;
use data_encoding::HEXLOWER;
use ledger_core::utils::public_key_from_pkcs8;
use ledger_core::{
    hash_pub_key, new_key_pair, BlockHeader, Blockchain, Command, Miner, NodeConfig, Opt,
    SledStorage,
};
use log::{error, info, LevelFilter};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct HeaderEntry<'a> {
    hash: String,
    #[serde(flatten)]
    header: &'a BlockHeader,
}

#[tokio::main]
async fn main() {
    // RUST_LOG still overrides the default level
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt).await {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn open_chain(config: &NodeConfig) -> ledger_core::Result<(Arc<SledStorage>, Arc<Blockchain>)> {
    let storage = Arc::new(SledStorage::open(&config.data_dir)?);
    let chain = Blockchain::open(storage.clone(), &config.chain, &config.sync)?;
    Ok((storage, Arc::new(chain)))
}

async fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::load(opt.config.as_deref())?;

    match opt.command {
        Command::Keygen => {
            let pkcs8 = new_key_pair()?;
            let pub_key_hash = hash_pub_key(&public_key_from_pkcs8(&pkcs8)?);
            println!("private key (pkcs8): {}", HEXLOWER.encode(&pkcs8));
            println!("public key hash:     {}", HEXLOWER.encode(&pub_key_hash));
        }
        Command::Mine { blocks } => {
            let (storage, chain) = open_chain(&config)?;
            let miner = Arc::new(Miner::new(chain.clone(), &config.miner)?);
            let mined = miner.run(CancellationToken::new(), Some(blocks)).await?;
            storage.flush()?;
            info!("Mined {mined} blocks, chain height is now {}", chain.height());
        }
        Command::Status => {
            let (_, chain) = open_chain(&config)?;
            let utxos = chain.utxo_set();
            println!("status:        {:?}", chain.status());
            println!("height:        {}", chain.height());
            println!(
                "tip:           {}",
                chain.last_block_hash().unwrap_or_else(|| "-".to_string())
            );
            println!("unspent:       {} outputs", utxos.len());
            println!("total value:   {}", utxos.total_value());
            println!("target bits:   {}", config.chain.target_bits);
        }
        Command::Balance { pub_key_hash } => {
            let pub_key_hash = hex::decode(&pub_key_hash)?;
            let (_, chain) = open_chain(&config)?;
            let balance: u64 = chain
                .utxo_set()
                .find_utxo(&pub_key_hash)
                .iter()
                .map(|utxo| utxo.output.get_value())
                .sum();
            println!("Balance of {}: {balance}", HEXLOWER.encode(&pub_key_hash));
        }
        Command::PrintChain => {
            let (_, chain) = open_chain(&config)?;
            let hasher = chain.validator().get_hasher().clone();
            let headers = chain.headers()?;
            let entries: Vec<HeaderEntry> = headers
                .iter()
                .map(|header| HeaderEntry {
                    hash: header.hash(hasher.as_ref()),
                    header,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
