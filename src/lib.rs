pub mod batch;
pub mod cli;
pub mod config;
pub mod source;
pub mod supervisor;
pub mod upload;
pub mod watcher;
