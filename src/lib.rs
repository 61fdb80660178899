pub mod ads;
pub mod compositor;
pub mod config;
pub mod db;
pub mod graph;
pub mod model;
pub mod oauth;
pub mod orchestrator;
pub mod settings;
pub mod submission;
pub mod text;
pub mod worker;
