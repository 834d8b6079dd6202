pub mod auth_cmd;
pub mod codes;
pub mod common;
pub mod completions;
pub mod config;
pub mod event;
pub mod export;
pub mod process;
pub mod scan;
pub mod sync;
