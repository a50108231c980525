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

use serde_json::{Map, Value};

use super::{AliasTemplate, DataQuery, QueryError};

/// Rewrites every time series query of a batch into the current schema.
pub fn migrate_legacy_queries(
    mut queries: Vec<DataQuery>,
    dynamic_labels: bool,
) -> Result<Vec<DataQuery>, QueryError> {
    for query in &mut queries {
        migrate_legacy_query(query, dynamic_labels)?;
    }
    Ok(queries)
}

pub fn migrate_legacy_query(query: &mut DataQuery, dynamic_labels: bool) -> Result<(), QueryError> {
    if !query.is_time_series() {
        return Ok(());
    }
    let ref_id = query.ref_id.clone();
    let model = query
        .model
        .as_object_mut()
        .ok_or_else(|| QueryError::malformed(&ref_id, "model", "query must be a JSON object"))?;
    migrate_statistics(model, &ref_id)?;
    if dynamic_labels {
        migrate_alias_to_dynamic_label(model);
    }
    Ok(())
}

fn migrate_statistics(model: &mut Map<String, Value>, ref_id: &str) -> Result<(), QueryError> {
    if model.contains_key("statistic") {
        return Ok(());
    }
    let first = match model.get("statistics") {
        None => return Ok(()),
        Some(Value::Array(statistics)) => match statistics.first() {
            None => None,
            Some(Value::String(statistic)) => Some(statistic.clone()),
            Some(_) => {
                return Err(QueryError::malformed(
                    ref_id,
                    "statistics",
                    "statistics must be strings",
                ));
            }
        },
        Some(_) => {
            return Err(QueryError::malformed(
                ref_id,
                "statistics",
                "expected a list of statistics",
            ));
        }
    };
    model.remove("statistics");
    if let Some(statistic) = first {
        model.insert("statistic".into(), Value::String(statistic));
    }
    Ok(())
}

fn migrate_alias_to_dynamic_label(model: &mut Map<String, Value>) {
    if model.contains_key("label") {
        return;
    }
    let Some(alias) = model.get("alias").and_then(Value::as_str) else {
        return;
    };
    let label = AliasTemplate::compile(alias).to_dynamic_label();
    model.insert("label".into(), Value::String(label));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TimeRange;
    use chrono::Utc;
    use serde_json::json;

    fn time_series(ref_id: &str, model: Value) -> DataQuery {
        let now = Utc::now();
        DataQuery {
            ref_id: ref_id.into(),
            query_type: "timeSeriesQuery".into(),
            time_range: TimeRange::new(now, now),
            model,
        }
    }

    fn legacy_model(extra: Value) -> Value {
        let mut model = json!({
            "region": "us-east-1",
            "namespace": "ec2",
            "metricName": "CPUUtilization",
            "alias": "{{period}} {{any_other_word}}",
            "dimensions": {"InstanceId": ["test"]},
            "statistic": "Average",
            "period": "600",
            "hide": false
        });
        if let (Some(target), Value::Object(extra)) = (model.as_object_mut(), extra) {
            target.extend(extra);
        }
        model
    }

    #[test]
    fn statistics_list_is_narrowed_to_first_entry() {
        let query = time_series(
            "A",
            json!({
                "region": "us-east-1",
                "namespace": "ec2",
                "metricName": "CPUUtilization",
                "dimensions": {"InstanceId": ["test"]},
                "statistics": ["Average", "Sum"],
                "period": "600",
                "hide": false
            }),
        );
        let migrated = migrate_legacy_queries(vec![query], false).unwrap();
        assert_eq!(migrated.len(), 1);
        assert_eq!(migrated[0].ref_id, "A");
        assert_eq!(migrated[0].model["statistic"], json!("Average"));
        assert!(migrated[0].model.get("statistics").is_none());
    }

    #[test]
    fn alias_is_migrated_when_enabled_and_label_missing() {
        let migrated =
            migrate_legacy_queries(vec![time_series("A", legacy_model(json!({})))], true).unwrap();
        assert_eq!(
            migrated[0].model,
            json!({
                "alias": "{{period}} {{any_other_word}}",
                "label": "${PROP('Period')} ${PROP('Dim.any_other_word')}",
                "dimensions": {"InstanceId": ["test"]},
                "hide": false,
                "metricName": "CPUUtilization",
                "namespace": "ec2",
                "period": "600",
                "region": "us-east-1",
                "statistic": "Average"
            })
        );
    }

    #[test]
    fn every_query_in_the_batch_is_migrated_in_order() {
        let migrated = migrate_legacy_queries(
            vec![
                time_series("A", legacy_model(json!({}))),
                time_series("B", legacy_model(json!({"alias": "{{  label }}"}))),
            ],
            true,
        )
        .unwrap();
        assert_eq!(migrated.len(), 2);
        assert_eq!(migrated[0].ref_id, "A");
        assert_eq!(
            migrated[0].model["label"],
            json!("${PROP('Period')} ${PROP('Dim.any_other_word')}")
        );
        assert_eq!(migrated[1].ref_id, "B");
        assert_eq!(migrated[1].model["label"], json!("${LABEL}"));
        assert_eq!(migrated[1].model["alias"], json!("{{  label }}"));
    }

    #[test]
    fn label_is_not_added_unless_all_conditions_hold() {
        let cases = [
            (json!({"label": "some label"}), true),
            (json!({}), false),
            (json!({"label": "some label"}), false),
        ];
        for (extra, enabled) in cases {
            let original = legacy_model(extra);
            let migrated =
                migrate_legacy_queries(vec![time_series("A", original.clone())], enabled).unwrap();
            assert_eq!(migrated[0].model, original);
        }

        let mut without_alias = legacy_model(json!({}));
        without_alias.as_object_mut().unwrap().remove("alias");
        let migrated =
            migrate_legacy_queries(vec![time_series("A", without_alias.clone())], true).unwrap();
        assert_eq!(migrated[0].model, without_alias);
    }

    #[test]
    fn empty_alias_migrates_to_empty_label() {
        let migrated = migrate_legacy_queries(
            vec![time_series("A", legacy_model(json!({"alias": ""})))],
            true,
        )
        .unwrap();
        assert_eq!(migrated[0].model["label"], json!(""));
        assert_eq!(migrated[0].model["alias"], json!(""));
    }

    #[test]
    fn modern_documents_are_left_alone() {
        let modern = legacy_model(json!({"label": "${LABEL}"}));
        for enabled in [true, false] {
            let migrated =
                migrate_legacy_queries(vec![time_series("A", modern.clone())], enabled).unwrap();
            assert_eq!(migrated[0].model, modern);
        }
    }

    #[test]
    fn other_query_kinds_are_not_migrated() {
        let mut query = time_series("A", json!({"statistics": ["Sum"], "alias": "{{metric}}"}));
        query.query_type = "logAction".into();
        let original = query.model.clone();
        let migrated = migrate_legacy_queries(vec![query], true).unwrap();
        assert_eq!(migrated[0].model, original);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let err = migrate_legacy_queries(vec![time_series("A", json!("not an object"))], false)
            .unwrap_err();
        assert_eq!(err.field(), Some("model"));

        let err = migrate_legacy_queries(
            vec![time_series("B", json!({"statistics": "Average"}))],
            false,
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("statistics"));
        assert!(err.to_string().contains("query B"));
    }

    #[test]
    fn rejected_statistics_leave_the_document_untouched() {
        let mut query = time_series("A", json!({"statistics": [5, "Sum"], "period": "60"}));
        let before = query.model.clone();
        let err = migrate_legacy_query(&mut query, false).unwrap_err();
        assert_eq!(err.field(), Some("statistics"));
        assert_eq!(query.model, before);
    }
}
