pub mod config;
pub mod fd_budget;
pub mod handlers;
pub mod humanize;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod source;
