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

//! Automatic sampling period selection.
//!
//! The chosen period is the larger of two lookups: one keeps the number of
//! datapoints per series bounded, the other follows the retention tiers of
//! the metrics API (older data is only kept at coarser resolutions).

use chrono::Duration;

/// Granularities accepted by the metrics API, ascending.
pub const PERIODS: [i64; 6] = [60, 300, 900, 3600, 21_600, 86_400];

const MAX_DATAPOINTS_DIVISOR: f64 = 2000.0;

/// Retention tiers as (age in days, finest period still retained beyond it).
const RETENTION_TIERS: [(i64, i64); 3] = [(455, 21_600), (63, 3600), (15, 300)];

pub fn resolve_period(duration: Duration, age: Duration) -> i64 {
    volume_period(duration).max(retention_period(age))
}

fn volume_period(duration: Duration) -> i64 {
    let seconds = duration.num_milliseconds() as f64 / 1000.0;
    if seconds <= 0.0 {
        return PERIODS[0];
    }
    let datapoints = (seconds / MAX_DATAPOINTS_DIVISOR).ceil() as i64;
    PERIODS
        .iter()
        .copied()
        .find(|period| datapoints <= *period)
        .unwrap_or(PERIODS[PERIODS.len() - 1])
}

fn retention_period(age: Duration) -> i64 {
    RETENTION_TIERS
        .iter()
        .find(|(days, _)| age > Duration::days(*days))
        .map(|(_, period)| *period)
        .unwrap_or(PERIODS[0])
}
