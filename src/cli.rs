use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "legado-reader",
    version,
    about = "Read books from a Legado reading server in the terminal.",
    long_about = None
)]
pub struct Cli {
    /// Server address (host:port or URL); defaults to the last one used
    #[clap(short, long, global = true, value_name = "ADDR")]
    pub server: Option<String>,

    /// Use a specific configuration file
    #[clap(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[clap(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Enable debug output
    #[clap(long, global = true)]
    pub debug: bool,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List the books on the server's bookshelf
    Books,

    /// Read a book, by shelf number or by name
    Read {
        /// Shelf number from `books`, or part of the title
        #[clap(name = "BOOK")]
        book: String,

        /// Chapter to open (1-based); defaults to the last one read
        #[clap(long, value_name = "N")]
        chapter: Option<usize>,

        /// Characters per page, overriding the configured size
        #[clap(long, value_name = "N")]
        page_size: Option<usize>,
    },

    /// Show server addresses used before
    History,
}
