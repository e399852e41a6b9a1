//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod add_task;
mod migrate;
mod modify;

pub use add_task::AddTaskArgs;
pub use migrate::MigrateArgs;
pub use modify::ModifyArgs;

use clap::Subcommand;

use pmt_core::Error;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Discover and apply migrations for task bundle upgrades
    Migrate(MigrateArgs),
    /// Add a task to build pipelines using a bundle reference
    AddTask(AddTaskArgs),
    /// Apply a stable, comment-preserving edit to pipeline YAML files
    Modify(ModifyArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Migrate(args) => migrate::handle_migrate(args).await,
        Commands::AddTask(args) => add_task::handle_add_task(args).await,
        Commands::Modify(args) => modify::handle_modify(args),
    }
}
