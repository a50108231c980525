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

use std::time::Duration;

use url::Url;

use super::client::{ApiError, GetMetricDataInput, GetMetricDataOutput, MetricDataApi};

const MAX_PAGES: usize = 100;

/// Posts `GetMetricData` requests as JSON to a metrics gateway.
#[derive(Debug, Clone)]
pub struct HttpMetricDataClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpMetricDataClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn fetch_page(&self, input: &GetMetricDataInput) -> Result<GetMetricDataOutput, ApiError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(input)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|err| {
            ApiError::UnexpectedResponse(format!("failed to decode GetMetricData output: {err}"))
        })
    }
}

impl MetricDataApi for HttpMetricDataClient {
    async fn get_metric_data(
        &self,
        input: &GetMetricDataInput,
    ) -> Result<GetMetricDataOutput, ApiError> {
        let mut request = input.clone();
        let mut output = GetMetricDataOutput::default();
        for page in 1..=MAX_PAGES {
            let GetMetricDataOutput {
                metric_data_results,
                messages,
                next_token,
            } = self.fetch_page(&request).await?;
            log::debug!(
                "GetMetricData page {page} for region {}: {} results",
                request.region,
                metric_data_results.len()
            );
            output.metric_data_results.extend(metric_data_results);
            output.messages.extend(messages);
            match next_token {
                Some(token) if !token.is_empty() => request.next_token = Some(token),
                _ => return Ok(output),
            }
        }
        Err(ApiError::UnexpectedResponse(format!(
            "GetMetricData did not finish after {MAX_PAGES} pages"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{Value, json};

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/metrics")).unwrap()
    }

    fn input() -> GetMetricDataInput {
        let now = Utc::now();
        GetMetricDataInput {
            region: "us-east-1".into(),
            start_time: now - ChronoDuration::hours(1),
            end_time: now,
            metric_data_queries: Vec::new(),
            next_token: None,
        }
    }

    async fn paged(Json(body): Json<Value>) -> Json<Value> {
        match body.get("NextToken").and_then(Value::as_str) {
            None => Json(json!({
                "MetricDataResults": [{"Id": "a", "Label": "first", "Values": [1.0]}],
                "NextToken": "2"
            })),
            Some(_) => Json(json!({
                "MetricDataResults": [{"Id": "a", "Label": "first", "Values": [2.0]}],
                "Messages": [{"Code": "MaxMetricsExceeded", "Value": "truncated"}]
            })),
        }
    }

    #[tokio::test]
    async fn follows_next_token_until_exhausted() {
        let endpoint = serve(Router::new().route("/metrics", post(paged))).await;
        let client = HttpMetricDataClient::new(endpoint, Duration::from_secs(5)).unwrap();
        let output = client.get_metric_data(&input()).await.unwrap();
        assert_eq!(output.metric_data_results.len(), 2);
        assert_eq!(output.metric_data_results[1].values, vec![2.0]);
        assert_eq!(output.messages.len(), 1);
        assert!(output.next_token.is_none());
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let router = Router::new().route(
            "/metrics",
            post(|| async { (StatusCode::FORBIDDEN, "access denied") }),
        );
        let endpoint = serve(router).await;
        let client = HttpMetricDataClient::new(endpoint, Duration::from_secs(5)).unwrap();
        match client.get_metric_data(&input()).await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "access denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_is_unexpected() {
        let router = Router::new().route("/metrics", post(|| async { "not json" }));
        let endpoint = serve(router).await;
        let client = HttpMetricDataClient::new(endpoint, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.get_metric_data(&input()).await,
            Err(ApiError::UnexpectedResponse(_))
        ));
    }
}
