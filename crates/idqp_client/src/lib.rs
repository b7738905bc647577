pub mod api;
pub mod config;
pub mod console;
pub mod controllers;
pub mod http;
pub mod in_flight;
pub mod logging;

pub use api::QualityApi;
pub use config::ClientConfig;
pub use console::QualityConsole;
pub use http::ApiClient;
