mod config_cmd;
mod sync_cmd;
mod user;

pub use config_cmd::ConfigCommand;
pub use sync_cmd::SyncCommand;
pub use user::UserCommand;
