//! Checkpoint inspection tool
//!
//! Lists the complete checkpoints in a directory or prints the paths of the
//! latest one. Read-only: never writes or deletes.

use std::path::PathBuf;

use checkpoint::Checkpointer;
use clap::{Parser, Subcommand};
use runtime_core::logging::init_tracing;
use runtime_core::{CheckpointerConfig, StaticRank};

#[derive(Parser)]
#[command(name = "checkpoint-inspect")]
#[command(version, about = "Inspect training checkpoints in a directory", long_about = None)]
struct Cli {
    /// Serialization directory to inspect
    dir: PathBuf,

    /// Rank whose shard files to read
    #[arg(long, default_value = "0", global = true)]
    rank: usize,

    /// Read per-rank shard files (`_w<rank>` suffix)
    #[arg(long, global = true)]
    sharded: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// List every complete checkpoint, oldest position first
    List,

    /// Print the two file paths of the latest checkpoint
    Latest,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Smallest world in which `rank` exists
fn inspection_oracle(rank: usize) -> Result<StaticRank, BoxError> {
    let world_size = rank
        .checked_add(1)
        .ok_or_else(|| format!("rank {} is out of range", rank))?;
    Ok(StaticRank::new(rank, world_size)?)
}

fn main() -> Result<(), BoxError> {
    init_tracing("checkpoint=info,storage=warn");

    let cli = Cli::parse();
    let oracle = inspection_oracle(cli.rank)?;
    let config = CheckpointerConfig {
        state_is_sharded: cli.sharded,
        keep_most_recent_by_count: None,
        ..CheckpointerConfig::new(&cli.dir)
    };
    let checkpointer = Checkpointer::new(config, &oracle)?;

    match cli.command.unwrap_or(Commands::List) {
        Commands::List => {
            let records = checkpointer.list_checkpoints()?;
            if records.is_empty() {
                println!("no checkpoints in {}", cli.dir.display());
            }
            for record in records {
                println!(
                    "{}\t{}\t{}",
                    record.position,
                    record.modified.to_rfc3339(),
                    record.paths.model_state.display()
                );
            }
        }
        Commands::Latest => match checkpointer.find_latest_checkpoint()? {
            Some(paths) => {
                println!("{}", paths.model_state.display());
                println!("{}", paths.training_state.display());
            }
            None => println!("no checkpoints in {}", cli.dir.display()),
        },
    }

    Ok(())
}
