pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod pagination;
pub mod session;
pub mod settings;
pub mod state;
pub mod ui;
pub mod worker;
