//! Command-line interface for tasksync
//!
//! This module defines the CLI structure using clap derive macros.
//! Each group of subcommands lives in its own submodule.

use std::future::Future;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::client::SyncClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::local::LocalService;
use crate::output::OutputOptions;
use crate::storage::{default_data_dir, Storage};

mod init;
mod task;
mod watch;

/// tasksync - todo list with optimistic sync
///
/// Every invocation is an independent client of the task file in the data
/// directory; `watch` shows changes made by other clients as they land.
#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true, env = "TASKSYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Owner whose tasks to work with
    #[arg(long, global = true, env = "TASKSYNC_OWNER")]
    pub owner: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and a default tasksync.toml
    Init,

    /// Add a task
    Add {
        /// Task title (1-100 characters)
        title: String,

        /// Optional description (up to 500 characters)
        #[arg(long, short = 'd')]
        description: Option<String>,
    },

    /// List tasks
    #[command(alias = "ls")]
    List {
        /// Status filter: all, active, completed
        #[arg(long)]
        filter: Option<String>,

        /// Sort key: created, updated, title
        #[arg(long)]
        sort: Option<String>,

        /// Sort direction: asc, desc
        #[arg(long)]
        direction: Option<String>,

        /// Case-insensitive text to look for in title or description
        #[arg(long, short = 's')]
        search: Option<String>,
    },

    /// Change a task's title or description
    Edit {
        /// Task id or unique prefix
        id: String,

        #[arg(long)]
        title: Option<String>,

        /// New description; an empty string clears it
        #[arg(long, short = 'd')]
        description: Option<String>,
    },

    /// Flip a task between active and completed
    Toggle {
        /// Task id or unique prefix
        id: String,
    },

    /// Delete a task
    #[command(alias = "delete")]
    Rm {
        /// Task id or unique prefix
        id: String,
    },

    /// Follow changes from other clients until interrupted
    Watch {
        /// Write notices as JSON lines to a file, or "-" for stdout
        #[arg(long)]
        notices: Option<String>,
    },
}

/// Resolved data directory, configuration and owner for one invocation.
pub(crate) struct Context {
    pub storage: Storage,
    pub config: Config,
    pub owner: String,
    pub options: OutputOptions,
}

impl Context {
    fn open(data_dir: PathBuf, owner: Option<String>, options: OutputOptions) -> Result<Self> {
        let storage = Storage::new(data_dir);
        let config = Config::load_from_dir(storage.root())?;
        let owner = owner
            .or_else(|| config.owner.clone())
            .map(|owner| owner.trim().to_string())
            .filter(|owner| !owner.is_empty())
            .ok_or_else(|| {
                Error::Auth("no owner given; pass --owner or set owner in tasksync.toml".to_string())
            })?;
        Ok(Self {
            storage,
            config,
            owner,
            options,
        })
    }

    /// A loaded client for this invocation's owner.
    pub async fn client(&self) -> Result<SyncClient<LocalService>> {
        let service = LocalService::new(self.storage.clone());
        let client = SyncClient::new(service, &self.owner, &self.config.sync)?;
        client.load().await?;
        Ok(client)
    }
}

/// Run `future` on a single-threaded runtime.
fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

fn resolve_data_dir(data_dir: Option<PathBuf>) -> Result<PathBuf> {
    data_dir.or_else(default_data_dir).ok_or_else(|| {
        Error::InvalidArgument(
            "could not determine a data directory; pass --data-dir".to_string(),
        )
    })
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let options = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let data_dir = resolve_data_dir(self.data_dir)?;
        let owner = self.owner;
        // Everything but init needs an initialized data dir and a signed-in owner.
        let open = || Context::open(data_dir.clone(), owner.clone(), options);

        match self.command {
            Commands::Init => init::run(data_dir.clone(), owner.clone(), options),
            Commands::Add { title, description } => {
                block_on(task::add(&open()?, title, description))
            }
            Commands::List {
                filter,
                sort,
                direction,
                search,
            } => block_on(task::list(
                &open()?,
                task::ListOptions {
                    filter,
                    sort,
                    direction,
                    search,
                },
            )),
            Commands::Edit {
                id,
                title,
                description,
            } => block_on(task::edit(&open()?, id, title, description)),
            Commands::Toggle { id } => block_on(task::toggle(&open()?, id)),
            Commands::Rm { id } => block_on(task::remove(&open()?, id)),
            Commands::Watch { notices } => block_on(watch::run(&open()?, notices)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_flags_parse() {
        let cli = Cli::try_parse_from([
            "tasksync", "--owner", "alice", "list", "--filter", "active", "--search", "milk",
        ])
        .unwrap();
        assert_eq!(cli.owner.as_deref(), Some("alice"));
        match cli.command {
            Commands::List { filter, search, .. } => {
                assert_eq!(filter.as_deref(), Some("active"));
                assert_eq!(search.as_deref(), Some("milk"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_owner_is_an_auth_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let options = OutputOptions {
            json: false,
            quiet: true,
        };
        let result = Context::open(temp.path().to_path_buf(), None, options);
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[test]
    fn init_runs_without_owner_but_list_needs_one() {
        let temp = tempfile::TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        let data_arg = data_dir.to_str().unwrap();

        let init = Cli::try_parse_from(["tasksync", "--quiet", "--data-dir", data_arg, "init"]);
        init.unwrap().run().unwrap();
        assert!(data_dir.join(crate::storage::TASKS_FILE).is_file());

        let list = Cli::try_parse_from(["tasksync", "--quiet", "--data-dir", data_arg, "list"]);
        assert!(matches!(list.unwrap().run(), Err(Error::Auth(_))));
    }
}
