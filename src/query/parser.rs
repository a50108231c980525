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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nom::{
    IResult, Parser,
    branch::alt,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res},
    error::Error as NomError,
    multi::many1,
    sequence::pair,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    CanonicalQuery, MetricEditorMode, MetricQueryType, QueryError, period::resolve_period,
};

const DEFAULT_REGION_ALIAS: &str = "default";

/// Turns migrated query documents into [`CanonicalQuery`] records.
#[derive(Debug, Clone)]
pub struct RequestParser {
    now: DateTime<Utc>,
    default_region: String,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// A parser that resolves automatic periods relative to `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            default_region: String::new(),
        }
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn parse(
        &self,
        model: &Value,
        ref_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CanonicalQuery, QueryError> {
        let map = model
            .as_object()
            .ok_or_else(|| QueryError::malformed(ref_id, "model", "query must be a JSON object"))?;
        let fields = Fields { map, ref_id };

        let expression = fields.string("expression")?;
        let period = match fields.period()? {
            Some(period) => period,
            None => {
                let period = resolve_period(to - from, self.now - from);
                log::debug!("query {ref_id}: resolved automatic period to {period}s");
                period
            }
        };
        let metric_query_type = fields.metric_query_type()?;
        let metric_editor_mode = fields.metric_editor_mode(&expression)?;

        Ok(CanonicalQuery {
            ref_id: ref_id.to_string(),
            region: self.region(fields.string("region")?),
            namespace: fields.string("namespace")?,
            metric_name: fields.string("metricName")?,
            id: metric_data_id(&fields.string("id")?, ref_id),
            expression,
            sql_expression: fields.string("sqlExpression")?,
            dimensions: fields.dimensions()?,
            statistic: fields.statistic()?,
            period,
            return_data: !fields.bool("hide", false)?,
            match_exact: fields.bool("matchExact", true)?,
            metric_query_type,
            metric_editor_mode,
            alias: fields.string("alias")?,
            label: fields.string("label")?,
        })
    }

    fn region(&self, region: String) -> String {
        if (region.is_empty() || region == DEFAULT_REGION_ALIAS) && !self.default_region.is_empty() {
            return self.default_region.clone();
        }
        region
    }
}

/// Identifiers accepted by the metrics API: a lowercase letter followed by
/// letters, digits or underscores.
pub fn is_valid_metric_data_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}

fn metric_data_id(declared: &str, ref_id: &str) -> String {
    if is_valid_metric_data_id(declared) {
        return declared.to_string();
    }
    let candidate = format!("query{ref_id}");
    if is_valid_metric_data_id(ref_id) {
        return candidate;
    }
    format!("query{}", Uuid::new_v4().simple())
}

struct Fields<'a> {
    map: &'a Map<String, Value>,
    ref_id: &'a str,
}

impl Fields<'_> {
    fn error(&self, field: &str, message: impl Into<String>) -> QueryError {
        QueryError::malformed(self.ref_id, field, message)
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name).filter(|value| !value.is_null())
    }

    fn string(&self, name: &str) -> Result<String, QueryError> {
        match self.get(name) {
            None => Ok(String::new()),
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Err(self.error(name, format!("expected a string, got {other}"))),
        }
    }

    fn bool(&self, name: &str, default: bool) -> Result<bool, QueryError> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(other) => Err(self.error(name, format!("expected a boolean, got {other}"))),
        }
    }

    fn statistic(&self) -> Result<String, QueryError> {
        let statistic = self.string("statistic")?;
        if !statistic.is_empty() {
            return Ok(statistic);
        }
        match self.get("statistics") {
            Some(Value::Array(items)) => match items.first() {
                None => Ok(String::new()),
                Some(Value::String(first)) => Ok(first.clone()),
                Some(other) => Err(self.error("statistics", format!("expected a string, got {other}"))),
            },
            Some(other) => Err(self.error("statistics", format!("expected a list, got {other}"))),
            None => Ok(String::new()),
        }
    }

    fn dimensions(&self) -> Result<BTreeMap<String, Vec<String>>, QueryError> {
        let mut dimensions = BTreeMap::new();
        let raw = match self.get("dimensions") {
            None => return Ok(dimensions),
            Some(Value::Object(raw)) => raw,
            Some(other) => {
                return Err(self.error("dimensions", format!("expected an object, got {other}")));
            }
        };
        for (key, value) in raw {
            let values = match value {
                Value::String(single) => vec![single.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => Ok(text.clone()),
                        other => Err(self.error(
                            "dimensions",
                            format!("values of `{key}` must be strings, got {other}"),
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                other => {
                    return Err(self.error(
                        "dimensions",
                        format!("`{key}` must be a string or a list of strings, got {other}"),
                    ));
                }
            };
            if values.is_empty() {
                log::debug!("query {}: dropping dimension `{key}` without values", self.ref_id);
                continue;
            }
            dimensions.insert(key.clone(), values);
        }
        Ok(dimensions)
    }

    /// The explicit period in seconds, or `None` when it should be resolved
    /// automatically.
    fn period(&self) -> Result<Option<i64>, QueryError> {
        match self.get("period") {
            None => Ok(None),
            Some(Value::Number(number)) => match number.as_i64() {
                Some(seconds) if seconds > 0 => Ok(Some(seconds)),
                _ => Err(self.error("period", format!("expected a positive integer, got {number}"))),
            },
            Some(Value::String(text)) => {
                let text = text.trim();
                if text.is_empty() || text.eq_ignore_ascii_case("auto") {
                    return Ok(None);
                }
                match parse_period_literal(text) {
                    Some(seconds) if seconds > 0 => Ok(Some(seconds)),
                    _ => Err(self.error("period", format!("invalid period `{text}`"))),
                }
            }
            Some(other) => Err(self.error("period", format!("expected a string, got {other}"))),
        }
    }

    fn metric_query_type(&self) -> Result<MetricQueryType, QueryError> {
        match self.get("metricQueryType") {
            None => Ok(MetricQueryType::Search),
            Some(value) => match enum_index(value, ["search", "query"]) {
                Some(0) => Ok(MetricQueryType::Search),
                Some(1) => Ok(MetricQueryType::Query),
                _ => Err(self.error("metricQueryType", format!("unknown query type {value}"))),
            },
        }
    }

    fn metric_editor_mode(&self, expression: &str) -> Result<MetricEditorMode, QueryError> {
        match self.get("metricEditorMode") {
            None if expression.trim().is_empty() => Ok(MetricEditorMode::Builder),
            None => Ok(MetricEditorMode::Raw),
            Some(value) => match enum_index(value, ["builder", "raw"]) {
                Some(0) => Ok(MetricEditorMode::Builder),
                Some(1) => Ok(MetricEditorMode::Raw),
                _ => Err(self.error("metricEditorMode", format!("unknown editor mode {value}"))),
            },
        }
    }
}

/// Enum fields are stored either as their index or as their name.
fn enum_index<const N: usize>(value: &Value, names: [&str; N]) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().filter(|index| *index < N as u64),
        Value::String(text) => names
            .iter()
            .position(|name| text.eq_ignore_ascii_case(name))
            .map(|index| index as u64),
        _ => None,
    }
}

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

/// Parses `"300"` or duration literals such as `"5m"` and `"1h30m"` into
/// seconds.
fn parse_period_literal(text: &str) -> Option<i64> {
    if text.bytes().all(|byte| byte.is_ascii_digit()) {
        return text.parse().ok();
    }
    let (_, parts) = all_consuming(many1(duration_part)).parse(text).ok()?;
    parts
        .into_iter()
        .try_fold(0i64, |total, seconds| total.checked_add(seconds))
}

fn duration_part(input: &str) -> NomResult<'_, i64> {
    map_res(
        pair(
            digit1,
            alt((char('s'), char('m'), char('h'), char('d'), char('w'))),
        ),
        |(digits, unit): (&str, char)| {
            let amount: i64 = digits.parse()?;
            let scale = match unit {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86_400,
                _ => 604_800,
            };
            Ok::<i64, std::num::ParseIntError>(amount.saturating_mul(scale))
        },
    )
    .parse(input)
}
