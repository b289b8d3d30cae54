//! Online-judge evaluation engine: sandboxed compile/execute/score task graph with priority-fair
//! scheduling (§1-§9 of the specification). This binary wires the library crates together: load
//! configuration, start the scheduler, serve the control endpoint.

mod challenge_builder;
mod config;
mod control;
mod message;

use std::sync::Arc;

use clap::Parser;
use judge_exec::Scheduler;
use tower_http::trace::TraceLayer;

use crate::config::{Config, Opt};
use crate::control::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env().init();

    let opt = Opt::parse();
    let config = Arc::new(Config::load(&opt)?);
    log::info!(
        "starting judge on {} with max_concurrent={}",
        config.bind_addr,
        config.max_concurrent
    );

    let scheduler = Scheduler::new(config.max_concurrent, config.max_concurrent);

    let state = AppState {
        config: config.clone(),
        scheduler,
    };
    let app = control::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
