pub mod cache;
pub mod config;
pub mod deploy;
pub mod environment;
pub mod errors;
pub mod logging;
pub mod routes;
pub mod server_config;
pub mod state;
