mod config;
mod error;
mod import;
mod job_controller;
mod services;
mod store;

use crate::config::Config;
use crate::job_controller::state::JobsState;
use crate::services::attendance::UploadLimit;
use crate::store::{DocumentStore, SqliteStore};
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| {
        error!("{}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    let store: Arc<dyn DocumentStore> = match SqliteStore::open(&config.database_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Could not open datastore {}: {}",
                config.database_path.display(),
                e
            );
            return Err(std::io::Error::other(e));
        }
    };
    let import_settings = web::Data::new(config.import_settings());
    let upload_limit = web::Data::new(UploadLimit(config.max_upload_bytes));

    // Initialize job controller state
    let (tx, rx) = mpsc::channel(100);
    let jobs_state = JobsState::new(tx);

    // Start job updater task
    let updater_state = jobs_state.clone();
    let updater_store = store.clone();
    tokio::spawn(async move {
        job_controller::state::start_job_updater(updater_state, updater_store, rx).await;
    });

    let store = web::Data::from(store);
    info!(
        "Attendance import service running at http://{}:{} (datastore {}, {} commit worker(s))",
        config.bind_host,
        config.bind_port,
        config.database_path.display(),
        config.concurrency
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(jobs_state.clone()))
            .app_data(store.clone())
            .app_data(import_settings.clone())
            .app_data(upload_limit.clone())
            .service(services::attendance::configure_routes())
    })
    .bind((config.bind_host.as_str(), config.bind_port))?
    .run()
    .await
}
