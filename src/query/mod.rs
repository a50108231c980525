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

mod label;
mod migrate;
mod parser;
mod period;
mod search;

pub use label::{AliasTemplate, DynamicLabel, LabelContext};
pub use migrate::{migrate_legacy_queries, migrate_legacy_query};
pub use parser::{RequestParser, is_valid_metric_data_id};
pub use period::{PERIODS, resolve_period};
pub use search::SearchExpression;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const TIME_SERIES_QUERY: &str = "timeSeriesQuery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// One raw query of a request batch, before migration and parsing.
#[derive(Debug, Clone)]
pub struct DataQuery {
    pub ref_id: String,
    pub query_type: String,
    pub time_range: TimeRange,
    pub model: Value,
}

impl DataQuery {
    /// The declared query kind: the batch-level tag wins, the document's
    /// own `type` field is the fallback.
    pub fn kind(&self) -> &str {
        if !self.query_type.is_empty() {
            return &self.query_type;
        }
        self.model
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn is_time_series(&self) -> bool {
        self.kind() == TIME_SERIES_QUERY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricQueryType {
    Search,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEditorMode {
    Builder,
    Raw,
}

/// How a canonical query is submitted to the metrics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    MetricStat,
    MathExpression,
    Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalQuery {
    pub ref_id: String,
    pub region: String,
    pub namespace: String,
    pub metric_name: String,
    pub id: String,
    pub expression: String,
    pub sql_expression: String,
    pub dimensions: BTreeMap<String, Vec<String>>,
    pub statistic: String,
    pub period: i64,
    pub return_data: bool,
    pub match_exact: bool,
    pub metric_query_type: MetricQueryType,
    pub metric_editor_mode: MetricEditorMode,
    pub alias: String,
    pub label: String,
}

impl CanonicalQuery {
    pub fn api_mode(&self) -> ApiMode {
        match (self.metric_query_type, self.metric_editor_mode) {
            (MetricQueryType::Query, _) => ApiMode::Query,
            (MetricQueryType::Search, MetricEditorMode::Builder) => ApiMode::MetricStat,
            (MetricQueryType::Search, MetricEditorMode::Raw) => {
                if self.is_user_defined_search_expression() {
                    ApiMode::MetricStat
                } else {
                    ApiMode::MathExpression
                }
            }
        }
    }

    pub fn is_user_defined_search_expression(&self) -> bool {
        self.metric_query_type == MetricQueryType::Search
            && self.metric_editor_mode == MetricEditorMode::Raw
            && self.expression.contains("SEARCH(")
    }

    pub fn is_inferred_search_expression(&self) -> bool {
        if self.metric_query_type != MetricQueryType::Search
            || self.metric_editor_mode != MetricEditorMode::Builder
        {
            return false;
        }
        if self.dimensions.is_empty() {
            return !self.match_exact;
        }
        if !self.match_exact {
            return true;
        }
        self.dimensions
            .values()
            .any(|values| values.len() > 1 || values.iter().any(|value| value == "*"))
    }

    pub fn is_multi_valued_dimension_expression(&self) -> bool {
        self.dimensions
            .values()
            .any(|values| values.len() > 1 && !values.iter().any(|value| value == "*"))
    }

    /// Period and statistic embedded in a user-authored `SEARCH(...)` call.
    pub fn search_expression(&self) -> Option<SearchExpression> {
        if !self.is_user_defined_search_expression() {
            return None;
        }
        SearchExpression::parse(&self.expression)
    }

    /// Statistic and period used for naming, preferring the values of a
    /// user-defined search expression over the document fields.
    pub fn naming_stat_and_period(&self) -> (String, String) {
        let mut stat = self.statistic.clone();
        let mut period = self.period.to_string();
        if let Some(search) = self.search_expression() {
            if let Some(value) = search.statistic {
                stat = value;
            }
            if let Some(value) = search.period {
                period = value;
            }
        }
        (stat, period)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query {ref_id}: invalid `{field}`: {message}")]
    MalformedInput {
        ref_id: String,
        field: String,
        message: String,
    },
    #[error("invalid time range: start time must be before end time")]
    InvalidTimeRange,
}

impl QueryError {
    pub fn malformed(ref_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            ref_id: ref_id.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MalformedInput { field, .. } => Some(field),
            Self::InvalidTimeRange => None,
        }
    }
}

pub fn validate_time_range(range: &TimeRange) -> Result<(), QueryError> {
    if range.from >= range.to {
        return Err(QueryError::InvalidTimeRange);
    }
    Ok(())
}
