pub mod config;
pub mod humanize;
pub mod manager;
pub mod observability;
pub mod pipeline;
pub mod plugins;
pub mod reporter;
