//! CLI command handlers.

mod check_config;
mod connectivity;
mod context;
mod run;
mod search;
mod sync;

pub use check_config::run_check_config_command;
pub use connectivity::run_test_command;
pub use run::run_scheduler_command;
pub use search::run_search_command;
pub use sync::run_sync_command;
