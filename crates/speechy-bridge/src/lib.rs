pub mod cli;
pub mod config;
pub mod runtime;

mod http_api;
