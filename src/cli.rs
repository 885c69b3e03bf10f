use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml
    #[clap(long, global = true, default_value = ".")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the vector produced for a text
    Embed {
        text: String,

        /// Print only the model tag and norm
        #[clap(short, long, default_value = "false")]
        summary: bool,
    },

    /// Embed every item that has no vector yet
    Backfill {
        /// JSON file with content items
        #[clap(short, long)]
        items: PathBuf,

        /// Max items to embed
        #[clap(short, long, default_value = "1000")]
        limit: usize,
    },

    /// Hybrid semantic and keyword search
    Search {
        query: String,

        /// JSON file with content items
        #[clap(short, long)]
        items: PathBuf,

        /// Max results
        #[clap(short, long, default_value = "10")]
        limit: usize,
    },

    /// Items similar to an existing item
    Similar {
        id: String,

        /// JSON file with content items
        #[clap(short, long)]
        items: PathBuf,

        /// Max results
        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
}
