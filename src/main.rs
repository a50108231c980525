// Copyright 2021 Datafuse Labs
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

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use cloudwatch_query_adapter::{
    app::{AppConfig, AppState, router},
    error::AppError,
};
use log::{LevelFilter, info};
use url::Url;

#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Args {
    /// GetMetricData gateway URL, e.g. http://127.0.0.1:4566/metrics
    #[arg(long = "endpoint", env = "METRICS_ENDPOINT")]
    endpoint: Url,
    /// HTTP bind address for the adapter server
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "0.0.0.0:3200")]
    bind: SocketAddr,
    /// Region used when a query leaves it empty or set to `default`
    #[arg(long = "default-region", env = "DEFAULT_REGION", default_value = "us-east-1")]
    default_region: String,
    /// Rewrite legacy `{{token}}` aliases into dynamic labels
    #[arg(long = "dynamic-labels", env = "DYNAMIC_LABELS")]
    dynamic_labels: bool,
    /// Timeout for each call to the metrics endpoint
    #[arg(long = "request-timeout-secs", env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let args = Args::parse();
    info!(
        "starting cloudwatch-query-adapter (endpoint={}, default_region={}, bind={})",
        args.endpoint, args.default_region, args.bind
    );
    let config = AppConfig {
        endpoint: args.endpoint.clone(),
        default_region: args.default_region.clone(),
        dynamic_labels: args.dynamic_labels,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };
    let state = AppState::bootstrap(config)?;
    let app = router(state);

    info!("binding TCP listener on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind listener: {err}")))?;
    info!("cloudwatch-query-adapter listening on {}", args.bind);
    axum::serve(listener, app)
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;
    Ok(())
}

fn init_logging() {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env().init();
    } else {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Warn)
            .filter_module("cloudwatch_query_adapter", LevelFilter::Info)
            .init();
    }
}
