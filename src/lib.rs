// Pear Container
// Servlet-style application container: contexts, wrappers, filter chains and valves

pub mod binding;
pub mod cli;
pub mod config;
pub mod context;
pub mod deployment;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod error_page;
pub mod filter_chain;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod listener;
pub mod loader;
pub mod mapper;
pub mod network;
pub mod observability;
pub mod registry;
pub mod resources;
pub mod servlet;
pub mod servlets;
pub mod session;
pub mod signals;
pub mod valve;
pub mod wrapper;

pub use context::Context;
pub use error::{ContainerError, LifecycleError, ServletError};
pub use host::Host;
pub use http::{DispatcherType, Request, Response};
pub use filter_chain::FilterChain;
pub use servlet::{Filter, Servlet};
pub use wrapper::Wrapper;
