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

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Serialize;
use tokio::task::JoinSet;

use crate::{
    cloudwatch::{
        ApiError, GetMetricDataOutput, MetricDataApi, MetricDataResult, StatusCode, plan_requests,
    },
    error::AppError,
    naming::frame_name,
    query::{
        CanonicalQuery, DataQuery, QueryError, RequestParser, migrate_legacy_query,
        validate_time_range,
    },
};

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Rewrite legacy aliases into dynamic labels before parsing.
    pub dynamic_labels: bool,
    /// Region used for documents that leave it empty or say `default`.
    pub default_region: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryDataRequest {
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDataResponse {
    pub results: BTreeMap<String, QueryResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One named series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub name: String,
    pub ref_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Milliseconds since the epoch.
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

pub struct Executor<C> {
    api: Arc<C>,
    config: ExecutorConfig,
}

impl<C> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            config: self.config.clone(),
        }
    }
}

impl<C: MetricDataApi> Executor<C> {
    pub fn new(api: Arc<C>, config: ExecutorConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs a batch of time series queries. The batch window is taken from
    /// the first query; only an invalid window fails the whole batch, every
    /// other problem is reported on the query it concerns.
    pub async fn execute(&self, request: QueryDataRequest) -> Result<QueryDataResponse, AppError> {
        let mut response = QueryDataResponse::default();
        let Some(first) = request.queries.first() else {
            return Ok(response);
        };
        let range = first.time_range;
        validate_time_range(&range)?;

        let parser = RequestParser::new().with_default_region(self.config.default_region.clone());
        let mut queries: Vec<CanonicalQuery> = Vec::with_capacity(request.queries.len());
        let mut ids = BTreeSet::new();
        for mut query in request.queries {
            if !query.is_time_series() {
                let message = format!("unsupported query type `{}`", query.kind());
                response.record_error(&query.ref_id, message);
                continue;
            }
            let parsed = migrate_legacy_query(&mut query, self.config.dynamic_labels).and_then(|_| {
                parser.parse(&query.model, &query.ref_id, range.from, range.to)
            });
            let parsed = parsed.and_then(|parsed| {
                if ids.insert(parsed.id.clone()) {
                    Ok(parsed)
                } else {
                    Err(QueryError::malformed(
                        &parsed.ref_id,
                        "id",
                        format!("`{}` is already used by another query", parsed.id),
                    ))
                }
            });
            match parsed {
                Ok(parsed) => queries.push(parsed),
                Err(err) => {
                    log::warn!("rejecting query {}: {err}", query.ref_id);
                    response.record_error(&query.ref_id, err.to_string());
                }
            }
        }
        for query in queries.iter().filter(|query| query.return_data) {
            response.results.entry(query.ref_id.clone()).or_default();
        }

        let plans = plan_requests(&queries, range);
        log::debug!(
            "dispatching {} queries in {} requests",
            queries.len(),
            plans.len()
        );
        let mut members = Vec::with_capacity(plans.len());
        let mut tasks = JoinSet::new();
        for (group, plan) in plans.into_iter().enumerate() {
            members.push(plan.members);
            let api = Arc::clone(&self.api);
            let input = plan.input;
            tasks.spawn(async move { (group, api.get_metric_data(&input).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            let (group, result) =
                joined.map_err(|err| AppError::Internal(format!("query task failed: {err}")))?;
            let group: Vec<&CanonicalQuery> = members[group].iter().map(|index| &queries[*index]).collect();
            match result.and_then(|output| check_result_ids(&group, output)) {
                Ok(output) => response.collect(&group, output),
                Err(err) => {
                    log::warn!("GetMetricData failed: {err}");
                    for query in &group {
                        response.record_error(&query.ref_id, err.to_string());
                    }
                }
            }
        }
        Ok(response)
    }
}

fn check_result_ids(
    group: &[&CanonicalQuery],
    output: GetMetricDataOutput,
) -> Result<GetMetricDataOutput, ApiError> {
    for result in &output.metric_data_results {
        if !group.iter().any(|query| query.id == result.id) {
            return Err(ApiError::UnexpectedResponse(format!(
                "result for unknown query id `{}`",
                result.id
            )));
        }
    }
    Ok(output)
}

/// Joins the pieces of a series that was split across result pages. Pieces
/// share their id and label; the first piece keeps its position.
fn merge_pages(results: Vec<MetricDataResult>) -> Vec<MetricDataResult> {
    let mut merged: Vec<MetricDataResult> = Vec::with_capacity(results.len());
    let mut positions: BTreeMap<(String, String), usize> = BTreeMap::new();
    for result in results {
        let key = (result.id.clone(), result.label.clone());
        let Some(&position) = positions.get(&key) else {
            positions.insert(key, merged.len());
            merged.push(result);
            continue;
        };
        let series = &mut merged[position];
        series.timestamps.extend(result.timestamps);
        series.values.extend(result.values);
        series.messages.extend(result.messages);
        if series.status_code == StatusCode::Complete {
            series.status_code = result.status_code;
        }
        for (name, value) in result.dimensions {
            series.dimensions.entry(name).or_insert(value);
        }
    }
    merged
}

impl QueryDataResponse {
    fn record_error(&mut self, ref_id: &str, message: String) {
        let result = self.results.entry(ref_id.to_string()).or_default();
        if result.error.is_none() {
            result.error = Some(message);
        }
    }

    fn collect(&mut self, group: &[&CanonicalQuery], output: GetMetricDataOutput) {
        for message in &output.messages {
            log::info!(
                "GetMetricData message {}: {}",
                message.code.as_deref().unwrap_or_default(),
                message.value.as_deref().unwrap_or_default()
            );
        }
        for series in merge_pages(output.metric_data_results) {
            let Some(query) = group.iter().find(|query| query.id == series.id) else {
                continue;
            };
            match series.status_code {
                StatusCode::Complete => {}
                StatusCode::PartialData => {
                    log::warn!("query {} returned partial data", query.ref_id);
                }
                status @ (StatusCode::InternalError | StatusCode::Forbidden) => {
                    self.record_error(
                        &query.ref_id,
                        format!("metric data for `{}` returned status {status}", series.id),
                    );
                    continue;
                }
            }
            if !query.return_data {
                continue;
            }
            let frame = Frame {
                name: frame_name(query, &series),
                ref_id: query.ref_id.clone(),
                labels: series.dimensions,
                timestamps: series
                    .timestamps
                    .iter()
                    .map(|ts| ts.timestamp_millis())
                    .collect(),
                values: series.values,
            };
            self.results
                .entry(query.ref_id.clone())
                .or_default()
                .frames
                .push(frame);
        }
    }
}
