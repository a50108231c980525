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

use std::{sync::Arc, time::Duration};

use log::info;
use url::Url;

use crate::{
    cloudwatch::{HttpMetricDataClient, MetricDataApi},
    error::AppError,
    executor::{Executor, ExecutorConfig, QueryDataRequest, QueryDataResponse},
};

pub struct AppConfig {
    pub endpoint: Url,
    pub default_region: String,
    pub dynamic_labels: bool,
    pub request_timeout: Duration,
}

pub struct AppState<C = HttpMetricDataClient> {
    executor: Executor<C>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
        }
    }
}

impl AppState<HttpMetricDataClient> {
    pub fn bootstrap(config: AppConfig) -> Result<Self, AppError> {
        let AppConfig {
            endpoint,
            default_region,
            dynamic_labels,
            request_timeout,
        } = config;
        info!(
            "using metrics endpoint {endpoint} (timeout={}s)",
            request_timeout.as_secs()
        );
        let client = HttpMetricDataClient::new(endpoint, request_timeout)?;
        info!("default region {default_region}, dynamic labels {dynamic_labels}");
        Ok(Self::with_api(
            Arc::new(client),
            ExecutorConfig {
                dynamic_labels,
                default_region,
            },
        ))
    }
}

impl<C: MetricDataApi> AppState<C> {
    pub fn with_api(api: Arc<C>, config: ExecutorConfig) -> Self {
        Self {
            executor: Executor::new(api, config),
        }
    }

    pub async fn execute(&self, request: QueryDataRequest) -> Result<QueryDataResponse, AppError> {
        self.executor.execute(request).await
    }
}
