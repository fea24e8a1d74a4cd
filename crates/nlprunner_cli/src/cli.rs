//! Flag surface for the `nlprunner` binary (spec.md §6 "CLI surface").
//!
//! One flat flag set rather than subcommands: a single invocation either
//! runs a pipeline, prints introspection output (`--listprocessors`,
//! `--describeprocessors`, `--democonfig`), or drives a standalone
//! `--cloud` operation against a remote NLPRP queue.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nlprunner", about = "Clinical-NLP pipeline controller")]
pub struct Cli {
    /// Enable verbose (debug-level) logging to stderr.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Path to the INI configuration file. Required for every mode except
    /// `--democonfig`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// NLP definition(s) to run. Repeatable; defaults to every definition
    /// declared in the config when omitted.
    #[arg(long = "nlpdef")]
    pub nlpdef: Vec<String>,

    /// Reprocess only records whose content hash has changed since their
    /// last run (default).
    #[arg(long, conflicts_with = "full")]
    pub incremental: bool,

    /// Reprocess every record regardless of progress history.
    #[arg(long, conflicts_with = "incremental")]
    pub full: bool,

    /// Skip the end-of-run deletion-detection pass that drops progress
    /// entries for source rows no longer present.
    #[arg(long)]
    pub skipdelete: bool,

    /// Drop and recreate destination tables before writing (full schema
    /// rebuild instead of additive reconciliation).
    #[arg(long)]
    pub dropremake: bool,

    /// Rows fetched per `Planner::next_batch` page.
    #[arg(long, default_value_t = 1000)]
    pub chunksize: usize,

    /// Override every output's configured row-count commit threshold.
    #[arg(long)]
    pub max_rows_before_commit: Option<usize>,

    /// Override every output's configured byte-size commit threshold.
    #[arg(long)]
    pub max_bytes_before_commit: Option<usize>,

    /// This invocation's shard index (0-based), for `--nprocesses N`
    /// sibling runs over disjoint PK partitions.
    #[arg(long, default_value_t = 0)]
    pub process: u32,

    /// Total number of sibling shards sharing this run.
    #[arg(long, default_value_t = 1)]
    pub nprocesses: u32,

    /// Print the configured processors (name, version, type) and exit.
    #[arg(long)]
    pub listprocessors: bool,

    /// Print each configured processor's full descriptor (tabular schema
    /// included) as JSON and exit.
    #[arg(long)]
    pub describeprocessors: bool,

    /// Print an annotated example configuration covering every section
    /// type and exit; no `--config` is required.
    #[arg(long)]
    pub democonfig: bool,

    /// When a processor is configured with `queue = true`, run it
    /// immediately instead for this invocation.
    #[arg(long)]
    pub immediate: bool,

    /// Fetch (and delete) all ready entries from a remote queue tracked
    /// under `--nlpdef`'s cloud processor, instead of running a pipeline.
    #[arg(long)]
    pub retrieve: bool,

    /// List a remote queue's outstanding entries, instead of running a
    /// pipeline.
    #[arg(long)]
    pub showqueue: bool,

    /// Cancel (delete) one remote queue entry by id.
    #[arg(long)]
    pub cancelrequest: Option<String>,

    /// Cancel (delete) every outstanding remote queue entry.
    #[arg(long)]
    pub cancelall: bool,
}

impl Cli {
    pub fn is_cloud_command(&self) -> bool {
        self.retrieve || self.showqueue || self.cancelrequest.is_some() || self.cancelall
    }

    pub fn is_introspection_command(&self) -> bool {
        self.listprocessors || self.describeprocessors || self.democonfig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn democonfig_requires_no_other_flags() {
        let cli = Cli::parse_from(["nlprunner", "--democonfig"]);
        assert!(cli.democonfig);
        assert!(cli.config.is_none());
        assert!(!cli.is_cloud_command());
    }

    #[test]
    fn incremental_and_full_are_mutually_exclusive() {
        let result = Cli::try_parse_from(["nlprunner", "--config", "x.ini", "--incremental", "--full"]);
        assert!(result.is_err());
    }

    #[test]
    fn showqueue_is_recognized_as_a_cloud_command() {
        let cli = Cli::parse_from(["nlprunner", "--config", "x.ini", "--nlpdef", "crp", "--showqueue"]);
        assert!(cli.is_cloud_command());
        assert!(!cli.is_introspection_command());
    }

    #[test]
    fn listprocessors_is_recognized_as_introspection() {
        let cli = Cli::parse_from(["nlprunner", "--config", "x.ini", "--listprocessors"]);
        assert!(cli.is_introspection_command());
        assert!(!cli.is_cloud_command());
    }

    #[test]
    fn nlpdef_flag_is_repeatable() {
        let cli = Cli::parse_from(["nlprunner", "--config", "x.ini", "--nlpdef", "a", "--nlpdef", "b"]);
        assert_eq!(cli.nlpdef, vec!["a".to_string(), "b".to_string()]);
    }
}
