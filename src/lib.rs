pub mod cli;
pub mod config;
pub mod frontend;
pub mod models;
pub mod relay;
pub mod supervisor;
pub mod system_proxy;
pub mod transport;
pub mod utils;
