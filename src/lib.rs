pub mod app;
pub mod auth;
pub mod cli;
pub mod collab;
pub mod config;
pub mod editor;
pub mod error;
pub mod export;
pub mod model;
pub mod preview;
pub mod search;
pub mod storage;
pub mod tags;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use error::{Error, Result};
