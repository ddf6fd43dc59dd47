// Copyright 2026 Northern.tech AS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use relay_core::{bus::InMemoryBus, config, datastore::InMemoryDataStore, App};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-service", about = "device-to-user remote-access relay")]
struct Args {
    /// Path to a toml config file. Missing is fine; defaults apply.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the operator-facing HTTP server on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let cfg = config::read_config(args.config.as_deref()).context("loading configuration")?;

    info!(listen = %args.listen, "starting relay-service");

    let bus = InMemoryBus::new(cfg.channel_size);
    let store = InMemoryDataStore::new();
    let app = Arc::new(App::new(cfg, bus, store));

    let router = relay_service::router(app);

    let listener = tokio::net::TcpListener::bind(args.listen).await.context("binding listen address")?;
    axum::serve(listener, router).await.context("serving http")?;

    Ok(())
}
