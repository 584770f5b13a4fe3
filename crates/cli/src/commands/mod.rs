pub mod config_cmd;
pub mod transcript;
