pub mod config_cmd;
pub mod import;
pub mod init;
pub mod list;
pub mod new;
pub mod recipe;
#[cfg(feature = "watch")]
pub mod watch;
