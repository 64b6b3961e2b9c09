//! Interactive shell for the Bramble block index.
//!
//! Commands map 1:1 onto the public index operations:
//!
//! ```text
//! insert <key> <value>   bind a new key
//! update <key> <value>   overwrite an existing binding
//! lookup <key>           fetch a value
//! delete <key>           (unimplemented in the engine)
//! display [tree|dot|sorted]
//! sanity                 run the structural sanity check
//! stats                  store geometry and free-list head
//! quit                   persist the superblock and exit
//! ```

use bramble_cache::{BlockCache, FileCache, MemoryCache};
use bramble_common::config::StoreConfig;
use bramble_index::{BTreeIndex, DisplayMode};
use clap::Parser;
use eyre::{Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

const PROMPT: &str = "bramble> ";

#[derive(Parser, Debug)]
#[command(
    name = "bramble",
    version,
    about = "Interactive shell for the Bramble block index"
)]
struct Cli {
    /// Store file. Omit to run against an in-memory store.
    #[arg(value_name = "FILE")]
    path: Option<PathBuf>,

    /// Format the store before mounting it.
    #[arg(long)]
    create: bool,

    /// Key width in bytes.
    #[arg(long, default_value_t = 8)]
    key_size: usize,

    /// Value width in bytes.
    #[arg(long, default_value_t = 8)]
    value_size: usize,

    /// Block width in bytes.
    #[arg(long, default_value_t = 256)]
    block_size: usize,

    /// Number of blocks in a newly created store.
    #[arg(long, default_value_t = 1024)]
    num_blocks: u64,

    /// Fsync file-backed writes.
    #[arg(long)]
    fsync: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StoreConfig {
        key_size: cli.key_size,
        value_size: cli.value_size,
        block_size: cli.block_size,
        num_blocks: cli.num_blocks,
        fsync_enabled: cli.fsync,
    };
    config.validate().wrap_err("invalid store geometry")?;

    match &cli.path {
        Some(path) => {
            let creating = cli.create || !path.exists();
            let cache = if creating {
                info!(path = %path.display(), "creating store file");
                FileCache::create(path, config.block_size, config.num_blocks, config.fsync_enabled)?
            } else {
                FileCache::open(path, config.block_size, config.fsync_enabled)?
            };
            run(cache, &config, creating)
        }
        None => {
            let cache = MemoryCache::new(config.block_size, config.num_blocks);
            run(cache, &config, true)
        }
    }
}

fn run<C: BlockCache>(cache: C, config: &StoreConfig, create: bool) -> Result<()> {
    let mut index = BTreeIndex::new(config.key_size, config.value_size, cache)
        .wrap_err("failed to build index handle")?;
    index.attach(0, create).wrap_err("failed to mount store")?;

    println!(
        "bramble shell: key {} / value {} / block {} / {} blocks (type `help`)",
        config.key_size,
        config.value_size,
        config.block_size,
        index.cache().num_blocks()
    );

    let mut editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if !dispatch(&mut index, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C"),
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("error reading input: {err}");
                break;
            }
        }
    }

    index.detach().wrap_err("failed to persist superblock")?;
    println!("bye");
    Ok(())
}

/// Executes one command line. Returns false when the shell should exit.
fn dispatch<C: BlockCache>(index: &mut BTreeIndex<C>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    match (command, args.as_slice()) {
        ("insert", [key, value]) => report(index.insert(key.as_bytes(), value.as_bytes())),
        ("update", [key, value]) => report(index.update(key.as_bytes(), value.as_bytes())),
        ("lookup", [key]) => match index.lookup(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(err) => eprintln!("error: {err}"),
        },
        ("delete", [key]) => report(index.delete(key.as_bytes())),
        ("display", rest) => {
            let mode = match rest {
                [] | ["tree"] => Some(DisplayMode::Depth),
                ["dot"] => Some(DisplayMode::DepthDot),
                ["sorted"] => Some(DisplayMode::SortedKeyval),
                _ => None,
            };
            match mode {
                Some(mode) => {
                    let stdout = std::io::stdout();
                    let mut out = stdout.lock();
                    if let Err(err) = index.display(&mut out, mode) {
                        eprintln!("error: {err}");
                    }
                    let _ = out.flush();
                }
                None => eprintln!("usage: display [tree|dot|sorted]"),
            }
        }
        ("sanity", []) => match index.sanity_check() {
            Ok(()) => println!("ok"),
            Err(err) => eprintln!("error: {err}"),
        },
        ("stats", []) => {
            println!(
                "blocks: {} x {} bytes, root at {}, free-list head {}",
                index.cache().num_blocks(),
                index.cache().block_size(),
                index.root_block(),
                index.free_list_head()
            );
        }
        ("help", _) => {
            println!(
                "commands:\n  insert <key> <value>\n  update <key> <value>\n  lookup <key>\n  \
                 delete <key>\n  display [tree|dot|sorted]\n  sanity\n  stats\n  quit"
            );
        }
        ("quit" | "exit", _) => return false,
        _ => eprintln!("unknown command (try `help`)"),
    }
    true
}

fn report(result: bramble_common::Result<()>) {
    match result {
        Ok(()) => println!("ok"),
        Err(err) => eprintln!("error: {err}"),
    }
}
