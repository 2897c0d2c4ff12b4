// Network module
// HTTP/1.1 and HTTP/2 listener feeding the container's host pipeline

pub mod config;
mod server;

pub use config::NetworkConfig;
pub use server::{into_container_request, into_hyper_response, serve};
