pub mod catalog;
pub mod chat;
pub mod context;
pub mod logger;
pub mod orchestrator;
pub mod registry;
pub mod tooling;
pub mod transcript;
