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

use crate::{
    cloudwatch::MetricDataResult,
    query::{AliasTemplate, ApiMode, CanonicalQuery, DynamicLabel, LabelContext, MetricQueryType},
};

/// Display name of one returned series.
///
/// Templates win when they render to something non-empty. Without one the
/// name depends on how the query was submitted: the API label for
/// metrics-insights and search queries, the sub-query id for math, and
/// `<metric>_<stat>` for plain metric stats.
pub fn frame_name(query: &CanonicalQuery, series: &MetricDataResult) -> String {
    let (stat, period) = query.naming_stat_and_period();
    let ctx = LabelContext {
        label: &series.label,
        metric_name: &query.metric_name,
        namespace: &query.namespace,
        region: &query.region,
        stat: &stat,
        period: &period,
        dimensions: series_dimensions(query, series),
        values: &series.values,
    };

    if !query.label.is_empty() {
        let name = DynamicLabel::parse(&query.label).render(&ctx);
        if !name.is_empty() {
            return name;
        }
    }
    if !query.alias.is_empty() {
        let name = AliasTemplate::compile(&query.alias).render(&ctx);
        if !name.is_empty() {
            return name;
        }
    }

    if query.metric_query_type == MetricQueryType::Query {
        return series.label.clone();
    }
    if query.api_mode() == ApiMode::MathExpression {
        return series.id.clone();
    }
    if query.is_user_defined_search_expression() {
        return series.label.clone();
    }
    if query.is_inferred_search_expression() && !query.is_multi_valued_dimension_expression() {
        return series.label.clone();
    }
    format!("{}_{}", query.metric_name, query.statistic)
}

/// Dimensions reported for the series, or the query's own single-valued
/// filters when the API reports none.
fn series_dimensions(query: &CanonicalQuery, series: &MetricDataResult) -> BTreeMap<String, String> {
    if !series.dimensions.is_empty() {
        return series.dimensions.clone();
    }
    query
        .dimensions
        .iter()
        .filter_map(|(name, values)| match values.as_slice() {
            [value] if value != "*" => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MetricEditorMode;

    fn query(dimensions: &[(&str, &[&str])], match_exact: bool) -> CanonicalQuery {
        CanonicalQuery {
            ref_id: "A".into(),
            region: "us-east-2".into(),
            namespace: "AWS/EC2".into(),
            metric_name: "CPUUtilization".into(),
            id: "queryA".into(),
            expression: String::new(),
            sql_expression: String::new(),
            dimensions: dimensions
                .iter()
                .map(|(key, values)| {
                    (
                        key.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect(),
            statistic: "Maximum".into(),
            period: 1200,
            return_data: true,
            match_exact,
            metric_query_type: MetricQueryType::Search,
            metric_editor_mode: MetricEditorMode::Builder,
            alias: String::new(),
            label: String::new(),
        }
    }

    fn series(id: &str, label: &str) -> MetricDataResult {
        MetricDataResult {
            id: id.into(),
            label: label.into(),
            values: vec![1.0],
            ..Default::default()
        }
    }

    #[test]
    fn alias_uses_values_embedded_in_search_expression() {
        let mut query = query(&[], true);
        query.metric_editor_mode = MetricEditorMode::Raw;
        query.expression =
            "SEARCH('{AWS/EC2,InstanceId} MetricName=\"CPUUtilization\"', 'Average', 300)".into();
        query.alias = "{{period}} {{stat}}".into();
        assert_eq!(frame_name(&query, &series("a", "NetworkOut")), "300 Average");

        query.label = "${PROP('Period')} ${PROP('Stat')}".into();
        assert_eq!(frame_name(&query, &series("a", "NetworkOut")), "300 Average");
    }

    #[test]
    fn math_expression_without_alias_uses_series_id() {
        let mut query = query(&[], true);
        query.metric_editor_mode = MetricEditorMode::Raw;
        assert_eq!(frame_name(&query, &series("query id", "NetworkOut")), "query id");
    }

    #[test]
    fn metrics_insights_queries_use_api_label() {
        let mut query = query(&[("InstanceId", &["some-instance"])], false);
        query.metric_query_type = MetricQueryType::Query;
        assert_eq!(
            frame_name(&query, &series("queryA", "response label")),
            "response label"
        );
    }

    #[test]
    fn user_defined_search_without_alias_uses_api_label() {
        let mut query = query(&[], true);
        query.metric_editor_mode = MetricEditorMode::Raw;
        query.expression = "SEARCH('{AWS/EC2,InstanceId}', 'Average', 300)".into();
        assert_eq!(frame_name(&query, &series("queryA", "i-123")), "i-123");
    }

    #[test]
    fn inferred_single_valued_searches_use_api_label() {
        let cases: [(&[(&str, &[&str])], bool); 4] = [
            (&[("InstanceId", &["some-instance"])], false),
            (&[("InstanceId", &["*"])], false),
            (&[("InstanceId", &["*"])], true),
            (&[], false),
        ];
        for (dimensions, match_exact) in cases {
            let query = query(dimensions, match_exact);
            assert_eq!(
                frame_name(&query, &series("queryA", "response label")),
                "response label"
            );
        }
    }

    #[test]
    fn exact_and_multi_valued_builder_queries_use_metric_and_stat() {
        let cases: [(&[(&str, &[&str])], bool); 4] = [
            (&[("InstanceId", &["some-instance"])], true),
            (&[], true),
            (&[("InstanceId", &["some-instance", "another-instance"])], true),
            (&[("InstanceId", &["some-instance", "another-instance"])], false),
        ];
        for (dimensions, match_exact) in cases {
            let query = query(dimensions, match_exact);
            assert_eq!(
                frame_name(&query, &series("queryA", "response label")),
                "CPUUtilization_Maximum"
            );
        }
    }

    #[test]
    fn alias_resolves_dimensions_from_series_then_query() {
        let mut query = query(&[("InstanceId", &["i-1"])], true);
        query.alias = "{{metric}} {{InstanceId}}".into();
        assert_eq!(frame_name(&query, &series("queryA", "x")), "CPUUtilization i-1");

        let mut reported = series("queryA", "x");
        reported.dimensions.insert("InstanceId".into(), "i-9".into());
        assert_eq!(frame_name(&query, &reported), "CPUUtilization i-9");
    }

    #[test]
    fn empty_template_output_falls_through() {
        let mut query = query(&[], true);
        query.label = "${LABEL}".into();
        assert_eq!(frame_name(&query, &series("queryA", "")), "CPUUtilization_Maximum");
    }
}
