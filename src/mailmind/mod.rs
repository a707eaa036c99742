pub mod audit;
pub mod auth;
pub mod clean;
pub mod config;
pub mod gmail;
pub mod hasher;
pub mod llm;
pub mod mime;
pub mod paths;
pub mod protocol;
pub mod queue;
pub mod resolve;
pub mod service;
pub mod store;
pub mod util;

#[cfg(test)]
pub mod test_support;
