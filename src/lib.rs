pub mod db;
pub mod embeddings;
pub mod error;
pub mod kanban;
mod migrations;
pub mod processor;
pub mod queries;
pub mod ringcentral;
pub mod state;
pub mod types;
pub mod util;
