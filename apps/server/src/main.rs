#![warn(clippy::all, clippy::pedantic)]

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use meshkeys::{Config, ControlPlane};

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;

/// Control plane for admin bootstrap, networks and access keys
#[derive(Parser, Debug)]
#[command(name = "meshkeys")]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration, secrets redacted, and exit
    #[arg(long)]
    print_config: bool,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let config = Config::from_config(args.config.as_ref())?;
    if args.print_config {
        println!("{config}");
        return Ok(());
    }

    let ip: IpAddr = config.server.bind.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let plane = web::Data::new(ControlPlane::open(&config).await?);

    run_server(addr, plane).await
}

async fn run_server(addr: SocketAddr, plane: web::Data<ControlPlane>) -> Result<(), AppError> {
    tracing::info!(%addr, "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(plane.clone())
            .app_data(routes::json_config())
            .configure(routes::routes)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
