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

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use crate::{
    cloudwatch::MetricDataApi,
    error::AppError,
    executor::{QueryDataRequest, QueryDataResponse},
    query::{DataQuery, TimeRange},
};

use super::state::AppState;

pub fn router<C: MetricDataApi>(state: AppState<C>) -> Router {
    Router::new()
        .route("/api/ds/query", post(query_data::<C>))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

#[derive(Debug, Deserialize)]
struct QueryDataBody {
    from: Value,
    to: Value,
    #[serde(default)]
    queries: Vec<Value>,
}

async fn query_data<C: MetricDataApi>(
    State(state): State<AppState<C>>,
    Json(body): Json<QueryDataBody>,
) -> Result<Json<QueryDataResponse>, AppError> {
    let range = TimeRange::new(
        parse_epoch_millis(&body.from, "from")?,
        parse_epoch_millis(&body.to, "to")?,
    );
    log::debug!(
        "query data received: {} queries from={} to={}",
        body.queries.len(),
        range.from,
        range.to
    );
    let queries = body
        .queries
        .into_iter()
        .enumerate()
        .map(|(index, model)| data_query(index, model, range))
        .collect::<Result<Vec<_>, _>>()?;
    let response = state.execute(QueryDataRequest { queries }).await?;
    Ok(Json(response))
}

async fn healthz() -> &'static str {
    "ok"
}

fn data_query(index: usize, model: Value, range: TimeRange) -> Result<DataQuery, AppError> {
    let Some(object) = model.as_object() else {
        return Err(AppError::BadRequest(format!(
            "query at index {index} must be a JSON object"
        )));
    };
    let ref_id = match object.get("refId") {
        Some(Value::String(ref_id)) if !ref_id.is_empty() => ref_id.clone(),
        _ => {
            return Err(AppError::BadRequest(format!(
                "query at index {index} is missing `refId`"
            )));
        }
    };
    let query_type = object
        .get("queryType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(DataQuery {
        ref_id,
        query_type,
        time_range: range,
        model,
    })
}

/// Accepts epoch milliseconds as a JSON number or a numeric string.
fn parse_epoch_millis(value: &Value, field: &str) -> Result<DateTime<Utc>, AppError> {
    let millis = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AppError::BadRequest(format!("invalid `{field}`: expected epoch milliseconds")))?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::BadRequest(format!("`{field}` is out of range")))
}

async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status();
    let elapsed = start.elapsed();
    log::info!(
        "method={} path={} status={} duration_ms={:.3}",
        method,
        uri.path(),
        status.as_u16(),
        elapsed.as_secs_f64() * 1000.0
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cloudwatch::{ApiError, GetMetricDataInput, GetMetricDataOutput, MetricDataResult},
        executor::ExecutorConfig,
    };
    use serde_json::json;
    use std::sync::Arc;

    struct EchoApi;

    impl MetricDataApi for EchoApi {
        async fn get_metric_data(
            &self,
            input: &GetMetricDataInput,
        ) -> Result<GetMetricDataOutput, ApiError> {
            let metric_data_results = input
                .metric_data_queries
                .iter()
                .map(|query| MetricDataResult {
                    id: query.id.clone(),
                    label: format!("label of {}", query.id),
                    timestamps: vec![input.start_time],
                    values: vec![42.0],
                    ..Default::default()
                })
                .collect();
            Ok(GetMetricDataOutput {
                metric_data_results,
                ..Default::default()
            })
        }
    }

    async fn serve() -> String {
        let state = AppState::with_api(
            Arc::new(EchoApi),
            ExecutorConfig {
                dynamic_labels: true,
                default_region: "us-east-1".into(),
            },
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn window() -> (i64, i64) {
        let to = Utc::now().timestamp_millis() - 3_600_000;
        (to - 3_600_000, to)
    }

    #[test]
    fn epoch_millis_accept_numbers_and_strings() {
        let expected = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        assert_eq!(
            parse_epoch_millis(&json!(1_700_000_000_000i64), "from").unwrap(),
            expected
        );
        assert_eq!(
            parse_epoch_millis(&json!("1700000000000"), "from").unwrap(),
            expected
        );
        assert!(parse_epoch_millis(&json!("now-1h"), "from").is_err());
    }

    #[test]
    fn queries_need_a_ref_id() {
        let now = Utc::now();
        let range = TimeRange::new(now, now);
        assert!(data_query(0, json!({"namespace": "AWS/EC2"}), range).is_err());
        assert!(data_query(1, json!([1]), range).is_err());
        let query = data_query(
            0,
            json!({"refId": "A", "queryType": "timeSeriesQuery"}),
            range,
        )
        .unwrap();
        assert_eq!(query.ref_id, "A");
        assert!(query.is_time_series());
    }

    #[tokio::test]
    async fn query_endpoint_names_frames() {
        let base = serve().await;
        let (from, to) = window();
        let body = json!({
            "from": from.to_string(),
            "to": to,
            "queries": [{
                "refId": "A",
                "type": "timeSeriesQuery",
                "namespace": "AWS/EC2",
                "metricName": "CPUUtilization",
                "dimensions": {"InstanceId": ["i-1"]},
                "statistic": "Average",
                "alias": "{{metric}} {{InstanceId}}",
                "region": "default"
            }]
        });
        let response: Value = reqwest::Client::new()
            .post(format!("{base}/api/ds/query"))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let frame = &response["results"]["A"]["frames"][0];
        assert_eq!(frame["name"], json!("CPUUtilization i-1"));
        assert_eq!(frame["refId"], json!("A"));
        assert_eq!(frame["values"], json!([42.0]));
        assert!(response["results"]["A"].get("error").is_none());
    }

    #[tokio::test]
    async fn invalid_window_is_a_bad_request() {
        let base = serve().await;
        let (from, to) = window();
        let response = reqwest::Client::new()
            .post(format!("{base}/api/ds/query"))
            .json(&json!({
                "from": to,
                "to": from,
                "queries": [{"refId": "A", "type": "timeSeriesQuery"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body["error"],
            json!("invalid time range: start time must be before end time")
        );
    }

    #[tokio::test]
    async fn health_check_responds() {
        let base = serve().await;
        let response = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");
    }
}
