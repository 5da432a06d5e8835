//! radiance: real-time presence and messaging server.

use std::net::SocketAddr;

use clap::Parser;

use radiance::config::{Cli, Config};
use radiance::gateway::{app, AppState};
use radiance::rlog;
use radiance::storage::{db_path, Storage};

#[tokio::main]
async fn main() {
    radiance::logging::init();

    let config = Config::from_cli_and_env(Cli::parse());

    std::fs::create_dir_all(&config.data_dir).expect("failed to create data directory");
    let storage =
        Storage::open(&db_path(&config.data_dir)).expect("failed to open database");

    let state = AppState::new(storage);
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("listener address");
    rlog!("radiance listening on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
