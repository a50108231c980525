mod client;
mod http;
mod request;

pub use client::{
    ApiError, Dimension, GetMetricDataInput, GetMetricDataOutput, MessageData, Metric,
    MetricDataApi, MetricDataQuery, MetricDataResult, MetricStat, StatusCode,
};
pub use http::HttpMetricDataClient;
pub use request::{
    DispatchPlan, MAX_QUERIES_PER_REQUEST, build_search_expression, metric_data_query,
    plan_requests,
};
