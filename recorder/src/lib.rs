#[macro_use]
extern crate tracing;

pub mod capture;
pub mod chunk;
pub mod cleaner;
pub mod config;
pub mod controller_client;
pub mod downloader;
pub mod heartbeat;
pub mod joiner;
pub mod pipeline;
pub mod probe;
pub mod state_log;
pub mod storage;
pub mod uploader;
