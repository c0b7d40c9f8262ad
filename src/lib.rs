pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod loader;
pub mod normalizer;
pub mod pipeline;
pub mod prompt;
pub mod sandbox;
pub mod sanitizer;
pub mod schema;
pub mod script;
pub mod templates;
