use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::info;

mod aggregate;
mod api;
mod collector;
mod config;
mod database;
mod error;
mod hazemon;
mod reading;
pub mod schema;
mod service;
mod sqlite_database;
#[cfg(test)]
mod test_support;

use collector::{CollectOutcome, Collector};
use config::Config;
use database::Database;
use hazemon::HazemonClient;
use service::QueryService;
use sqlite_database::SqliteDatabase;

fn build_http<D: Database + Clone + Send + 'static>(
    config: Config,
    db: D,
    client: HazemonClient,
) -> anyhow::Result<actix_web::dev::Server> {
    let bind_addr = config.bind_addr.clone();

    let srv = HttpServer::new(move || {
            App::new()
                .service(api::status)
                .service(api::scope::<D>())
                .default_service(web::route().to(api::not_found))
                .wrap(Logger::default())
                // QueryService holds boxed sources, so every worker builds its own
                .app_data(web::Data::new(QueryService::with_store(client.clone(), &config.hazemon, db.clone())))
                .app_data(web::Data::new(Collector::new(client.clone(), &config.hazemon, db.clone())))
                .app_data(web::Data::new(client.clone()))
                .app_data(web::Data::new(config.clone()))
        })
        .bind(&bind_addr)
        .with_context(|| format!("Could not bind to {}", bind_addr))?
        .shutdown_timeout(60)
        .run();

    info!("Listening on {}", bind_addr);
    Ok(srv)
}

async fn collect_once<D: Database + Clone + Send + 'static>(
    config: &Config,
    db: D,
    client: HazemonClient,
) -> anyhow::Result<()> {
    let collector = Collector::new(client, &config.hazemon, db);
    match collector.collect().await? {
        CollectOutcome::Saved(reading) => println!("Saved reading {} for node {}", reading.timestamp, reading.node_id),
        CollectOutcome::Duplicate(reading) => println!("Reading {} already stored", reading.timestamp),
    }
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().context("Invalid configuration")?;
    let database = SqliteDatabase::new(&config.database_url)
        .with_context(|| format!("Could not open database {}", config.database_url))?;
    let client = HazemonClient::new();

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => {
            build_http(config, database, client)?.await?;
            info!("Server stopped");
            Ok(())
        }
        Some("collect") => collect_once(&config, database, client).await,
        Some(other) => anyhow::bail!("Unknown command {:?}, expected `serve` or `collect`", other),
    }
}
