use clap::{Parser, Subcommand};
use colored::Colorize;
use ds_core::{BLOCK_SIZE, DEFAULT_BLOCK_COUNT};
use ds_linux::{setup, ImageFlash};
use ds_store::{Completion, Datastore, StoreConfig, UpdateLength};
use std::path::PathBuf;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use log::{info, warn};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "datastore.img")] image: PathBuf,
    #[arg(long, default_value_t = DEFAULT_BLOCK_COUNT)] blocks: u32,
    /// Submit 16-byte updates like the deployed firmware.
    #[arg(long)] legacy_update: bool,
    #[command(subcommand)] cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the first LEN bytes of a block.
    Read { id: u32, #[arg(long, default_value_t = BLOCK_SIZE)] len: usize },
    /// Write TEXT (or --hex bytes) to a block, zero padded.
    Write { id: u32, text: String, #[arg(long)] hex: bool },
    /// Zero a block.
    Erase { id: u32 },
    /// Hex dump of every block.
    Dump,
}

fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !s.is_ascii() || s.len() % 2 != 0 {
        anyhow::bail!("expected an even number of hex digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn hex_line(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// Pump driver events until the write resolves or Ctrl-C.
fn wait(store: &mut Datastore, done: &Completion, running: &AtomicBool) -> anyhow::Result<()> {
    while running.load(Ordering::SeqCst) {
        if !store.poll() {
            std::thread::yield_now();
        }
        match done.poll() {
            Ok(()) => return Ok(()),
            Err(nb::Error::WouldBlock) => continue,
            Err(nb::Error::Other(e)) => return Err(e.into()),
        }
    }
    anyhow::bail!("interrupted with write still pending")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = StoreConfig {
        block_count: cli.blocks,
        update_len: if cli.legacy_update { UpdateLength::Legacy } else { UpdateLength::FullBlock },
    };

    setup::provision_image(&cli.image, config.block_count)?;
    let flash = ImageFlash::open(&cli.image)?;
    let mut store = Datastore::new(Box::new(flash), config);
    store.init()?;
    info!("Datastore ready: {} ({} blocks)", cli.image.display(), store.block_count());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        warn!("Signal received. Stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    match cli.cmd {
        Cmd::Read { id, len } => {
            let mut buf = vec![0u8; len];
            store.read(id, Some(&mut buf[..]), len)?;
            println!("{}", hex_line(&buf));
        }
        Cmd::Write { id, text, hex } => {
            let data = if hex { parse_hex(&text)? } else { text.into_bytes() };
            let done = store.write_tracked(id, Some(&data[..]), data.len())?;
            wait(&mut store, &done, &running)?;
            info!("Block {} written ({} bytes)", id, data.len());
        }
        Cmd::Erase { id } => {
            let done = store.write_tracked(id, None, 0)?;
            wait(&mut store, &done, &running)?;
            info!("Block {} erased", id);
        }
        Cmd::Dump => {
            for id in 0..store.block_count() {
                let mut buf = [0u8; BLOCK_SIZE];
                store.read_into(id, &mut buf)?;
                let line = hex_line(&buf);
                if buf.iter().any(|&b| b != 0) {
                    println!("{:>3}: {}", id, line.yellow());
                } else {
                    println!("{:>3}: {}", id, line.dimmed());
                }
            }
        }
    }
    Ok(())
}
