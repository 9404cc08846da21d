pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod revalidate;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use config::Config;
use db::Store;
use pipeline::ShortsPipeline;
use revalidate::Invalidator;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: ShortsPipeline,
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub invalidator: Arc<dyn Invalidator>,
}
