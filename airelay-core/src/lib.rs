pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod http_client;
pub mod inject;
pub mod model;
pub mod pump;
pub mod relay;
pub mod rewrite;
pub mod telemetry;
pub mod transcode;
pub mod upstream;
pub mod usage;
