//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueHint};

/// Guided HS tariff code classification over an indexed nomenclature tree
#[derive(Parser, Debug)]
#[command(name = "hstree")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity: -d info, -dd debug, -ddd trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file (layered over the global config)
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Persisted store (default: from config)
    #[arg(short, long, global = true, env = "HSTREE_STORE", value_hint = ValueHint::FilePath)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the store from a flat JSON record list
    Build {
        /// JSON array of records (USITC export format)
        #[arg(value_hint = ValueHint::FilePath)]
        source: PathBuf,
        /// Where to write the store (default: --store or config)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },

    /// Show store statistics
    Stats,

    /// Show one code with its path and duty rates
    Lookup {
        code: String,
    },

    /// List the immediate children of a code (top level when omitted)
    Children {
        code: Option<String>,
    },

    /// Print the owned tree below a code
    Tree {
        code: Option<String>,
        /// Levels to print
        #[arg(short, long, default_value_t = 2)]
        levels: usize,
    },

    /// Classify products end to end with the oracle
    Classify {
        /// Product description
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        product: Option<String>,
        /// JSON file holding an array of product descriptions
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Write the report to a file instead of stdout
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },

    /// Open a session and print its blob with the first question
    Start {
        product: String,
        /// Let the oracle answer the top-level question right away
        #[arg(long)]
        oracle: bool,
    },

    /// Take one step of a session blob
    Answer {
        /// Session blob printed by `start` or a previous `answer`
        state: String,
        /// Answer text ("3" or "FINAL: <code>"); the oracle answers when omitted
        answer: Option<String>,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Print a commented config template
    Template,

    /// Show config paths
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn given_repeated_debug_flag_when_parsing_then_counts() {
        let cli = Cli::try_parse_from(["hstree", "-dd", "stats"]).unwrap();
        assert_eq!(cli.debug, 2);
        assert!(matches!(cli.command, Some(Commands::Stats)));
    }

    #[test]
    fn given_classify_without_product_or_file_when_parsing_then_error() {
        assert!(Cli::try_parse_from(["hstree", "classify"]).is_err());
    }

    #[test]
    fn given_answer_without_text_when_parsing_then_answer_is_none() {
        let cli = Cli::try_parse_from(["hstree", "answer", "abc.def"]).unwrap();
        match cli.command {
            Some(Commands::Answer { state, answer }) => {
                assert_eq!(state, "abc.def");
                assert!(answer.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
