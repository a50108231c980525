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

use crate::query::{ApiMode, CanonicalQuery, TimeRange};

use super::client::{Dimension, GetMetricDataInput, Metric, MetricDataQuery, MetricStat};

/// Upper bound on sub-queries in a single `GetMetricData` call.
pub const MAX_QUERIES_PER_REQUEST: usize = 500;

const WILDCARD: &str = "*";

/// One API call: the region it targets, the positions of the canonical
/// queries it carries, and the request itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub region: String,
    pub members: Vec<usize>,
    pub input: GetMetricDataInput,
}

/// Groups queries by region and splits each group into calls of at most
/// [`MAX_QUERIES_PER_REQUEST`] sub-queries. Regions are visited in
/// lexicographic order; queries keep their batch order inside a region.
pub fn plan_requests(queries: &[CanonicalQuery], range: TimeRange) -> Vec<DispatchPlan> {
    let mut by_region: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, query) in queries.iter().enumerate() {
        by_region.entry(query.region.as_str()).or_default().push(index);
    }

    let mut plans = Vec::new();
    for (region, indexes) in by_region {
        for chunk in indexes.chunks(MAX_QUERIES_PER_REQUEST) {
            let metric_data_queries = chunk
                .iter()
                .map(|index| metric_data_query(&queries[*index]))
                .collect();
            plans.push(DispatchPlan {
                region: region.to_string(),
                members: chunk.to_vec(),
                input: GetMetricDataInput {
                    region: region.to_string(),
                    start_time: range.from,
                    end_time: range.to,
                    metric_data_queries,
                    next_token: None,
                },
            });
        }
    }
    plans
}

pub fn metric_data_query(query: &CanonicalQuery) -> MetricDataQuery {
    let mut entry = MetricDataQuery {
        id: query.id.clone(),
        expression: None,
        metric_stat: None,
        period: None,
        return_data: query.return_data,
    };
    match query.api_mode() {
        ApiMode::Query => {
            let text = if query.sql_expression.is_empty() {
                &query.expression
            } else {
                &query.sql_expression
            };
            entry.expression = Some(text.clone());
            entry.period = Some(query.period);
        }
        ApiMode::MathExpression => {
            entry.expression = Some(query.expression.clone());
        }
        ApiMode::MetricStat if query.is_user_defined_search_expression() => {
            entry.expression = Some(query.expression.clone());
            entry.period = Some(query.period);
        }
        ApiMode::MetricStat
            if query.is_inferred_search_expression()
                || query.is_multi_valued_dimension_expression() =>
        {
            entry.expression = Some(build_search_expression(query));
            entry.period = Some(query.period);
        }
        ApiMode::MetricStat => {
            let dimensions = query
                .dimensions
                .iter()
                .filter_map(|(name, values)| {
                    values.first().map(|value| Dimension {
                        name: name.clone(),
                        value: value.clone(),
                    })
                })
                .collect();
            entry.metric_stat = Some(MetricStat {
                metric: Metric {
                    namespace: query.namespace.clone(),
                    metric_name: query.metric_name.clone(),
                    dimensions,
                },
                period: query.period,
                stat: query.statistic.clone(),
            });
        }
    }
    entry
}

/// Generates the `REMOVE_EMPTY(SEARCH(...))` expression for builder queries
/// that cannot be expressed as a single metric stat.
pub fn build_search_expression(query: &CanonicalQuery) -> String {
    let mut search_term = format!("MetricName=\"{}\"", escape_double_quotes(&query.metric_name));
    let mut unknown_values = Vec::new();
    for (name, values) in &query.dimensions {
        if values.iter().any(|value| value == WILDCARD) {
            unknown_values.push(format!("\"{}\"", escape_double_quotes(name)));
            continue;
        }
        let quoted: Vec<String> = values
            .iter()
            .map(|value| format!("\"{}\"", escape_double_quotes(value)))
            .collect();
        let mut filter = quoted.join(" OR ");
        if quoted.len() > 1 {
            filter = format!("({filter})");
        }
        search_term.push_str(&format!(" \"{}\"={filter}", escape_double_quotes(name)));
    }

    if query.match_exact {
        let mut schema = query.namespace.clone();
        for name in query.dimensions.keys() {
            schema.push(',');
            schema.push_str(name);
        }
        return format!(
            "REMOVE_EMPTY(SEARCH('{{{schema}}} {search_term}', '{}', {}))",
            query.statistic, query.period
        );
    }

    if !unknown_values.is_empty() {
        search_term.push(' ');
        search_term.push_str(&unknown_values.join(" "));
    }
    format!(
        "REMOVE_EMPTY(SEARCH('Namespace=\"{}\" {search_term}', '{}', {}))",
        escape_double_quotes(&query.namespace),
        query.statistic,
        query.period
    )
}

fn escape_double_quotes(value: &str) -> String {
    value.replace('"', "\\\"")
}
