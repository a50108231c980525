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

//! Series naming templates.
//!
//! Two template languages are supported. The legacy alias uses `{{token}}`
//! placeholders; the dynamic label uses `${LABEL}` and `${PROP('...')}`
//! placeholders. Aliases can be rewritten into dynamic labels, and both can
//! be rendered against a [`LabelContext`].

use std::collections::BTreeMap;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, consumed, map, value},
    error::{Error as NomError, context},
    multi::fold_many0,
    sequence::{delimited, preceded, terminated},
};

/// Resolved properties of one returned series.
#[derive(Debug, Clone, Default)]
pub struct LabelContext<'a> {
    pub label: &'a str,
    pub metric_name: &'a str,
    pub namespace: &'a str,
    pub region: &'a str,
    pub stat: &'a str,
    pub period: &'a str,
    pub dimensions: BTreeMap<String, String>,
    pub values: &'a [f64],
}

impl LabelContext<'_> {
    fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AliasToken {
    Metric,
    Namespace,
    Period,
    Region,
    Stat,
    Label,
    Dimension(String),
}

impl AliasToken {
    fn from_name(name: &str) -> Self {
        match name {
            "metric" => Self::Metric,
            "namespace" => Self::Namespace,
            "period" => Self::Period,
            "region" => Self::Region,
            "stat" => Self::Stat,
            "label" => Self::Label,
            other => Self::Dimension(other.to_string()),
        }
    }

    fn dynamic_label(&self) -> String {
        match self {
            Self::Metric => "${PROP('MetricName')}".to_string(),
            Self::Namespace => "${PROP('Namespace')}".to_string(),
            Self::Period => "${PROP('Period')}".to_string(),
            Self::Region => "${PROP('Region')}".to_string(),
            Self::Stat => "${PROP('Stat')}".to_string(),
            Self::Label => "${LABEL}".to_string(),
            Self::Dimension(name) => format!("${{PROP('Dim.{name}')}}"),
        }
    }

    fn resolve<'c>(&self, ctx: &'c LabelContext<'_>) -> Option<&'c str> {
        match self {
            Self::Metric => Some(ctx.metric_name),
            Self::Namespace => Some(ctx.namespace),
            Self::Period => Some(ctx.period),
            Self::Region => Some(ctx.region),
            Self::Stat => Some(ctx.stat),
            Self::Label => Some(ctx.label),
            Self::Dimension(name) => ctx.dimension(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AliasSegment {
    Literal(String),
    Token { raw: String, token: AliasToken },
}

/// A legacy `{{token}}` alias split into literal text and tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTemplate {
    segments: Vec<AliasSegment>,
}

impl AliasTemplate {
    pub fn compile(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut start = 0;
        let bytes = source.as_bytes();
        while let Some(open) = find_subsequence(bytes, b"{{", start) {
            let Some(close) = find_subsequence(bytes, b"}}", open + 2) else {
                break;
            };
            let name = source[open + 2..close].trim();
            if name.is_empty() {
                push_literal(&mut segments, &source[start..close + 2]);
            } else {
                push_literal(&mut segments, &source[start..open]);
                segments.push(AliasSegment::Token {
                    raw: source[open..close + 2].to_string(),
                    token: AliasToken::from_name(name),
                });
            }
            start = close + 2;
        }
        push_literal(&mut segments, &source[start..]);
        Self { segments }
    }

    /// Rewrites the alias into the equivalent dynamic label template.
    pub fn to_dynamic_label(&self) -> String {
        let mut result = String::new();
        for segment in &self.segments {
            match segment {
                AliasSegment::Literal(text) => result.push_str(text),
                AliasSegment::Token { token, .. } => result.push_str(&token.dynamic_label()),
            }
        }
        result
    }

    /// Expands the alias against a series. Unknown dimensions keep their
    /// `{{token}}` text.
    pub fn render(&self, ctx: &LabelContext<'_>) -> String {
        let mut result = String::new();
        for segment in &self.segments {
            match segment {
                AliasSegment::Literal(text) => result.push_str(text),
                AliasSegment::Token { raw, token } => {
                    result.push_str(token.resolve(ctx).unwrap_or(raw));
                }
            }
        }
        result
    }
}

fn push_literal(segments: &mut Vec<AliasSegment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(AliasSegment::Literal(existing)) = segments.last_mut() {
        existing.push_str(text);
    } else {
        segments.push(AliasSegment::Literal(text.to_string()));
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if start > haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| start + pos)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Property {
    MetricName,
    Namespace,
    Period,
    Region,
    Stat,
    Dimension(String),
    Other,
}

impl Property {
    fn from_name(name: &str) -> Self {
        match name {
            "MetricName" => Self::MetricName,
            "Namespace" => Self::Namespace,
            "Period" => Self::Period,
            "Region" => Self::Region,
            "Stat" => Self::Stat,
            other => match other.strip_prefix("Dim.") {
                Some(dimension) => Self::Dimension(dimension.to_string()),
                None => Self::Other,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeriesStat {
    Min,
    Max,
    Avg,
    Sum,
    First,
    Last,
    DatapointCount,
}

impl SeriesStat {
    fn render(self, values: &[f64]) -> String {
        let finite = || values.iter().copied().filter(|v| v.is_finite());
        let rendered = match self {
            Self::DatapointCount => return values.len().to_string(),
            Self::Min => finite().reduce(f64::min),
            Self::Max => finite().reduce(f64::max),
            Self::Sum => finite().reduce(|a, b| a + b),
            Self::Avg => {
                let count = finite().count();
                finite()
                    .reduce(|a, b| a + b)
                    .map(|sum| sum / count as f64)
            }
            Self::First => values.first().copied(),
            Self::Last => values.last().copied(),
        };
        rendered.map(|v| v.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Label,
    Prop(Property),
    Stat(SeriesStat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelSegment {
    Literal(String),
    Placeholder { raw: String, placeholder: Placeholder },
}

/// A dynamic label template such as `${PROP('MetricName')} ${LABEL}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicLabel {
    segments: Vec<LabelSegment>,
}

impl DynamicLabel {
    pub fn parse(source: &str) -> Self {
        match all_consuming(label_segments).parse(source) {
            Ok((_, segments)) => Self { segments },
            Err(_) => Self {
                segments: vec![LabelSegment::Literal(source.to_string())],
            },
        }
    }

    /// Evaluates the template. Placeholders that cannot be resolved are
    /// kept as written.
    pub fn render(&self, ctx: &LabelContext<'_>) -> String {
        let mut result = String::new();
        for segment in &self.segments {
            match segment {
                LabelSegment::Literal(text) => result.push_str(text),
                LabelSegment::Placeholder { raw, placeholder } => match placeholder {
                    Placeholder::Label => result.push_str(ctx.label),
                    Placeholder::Stat(stat) => result.push_str(&stat.render(ctx.values)),
                    Placeholder::Prop(property) => {
                        let resolved = match property {
                            Property::MetricName => Some(ctx.metric_name),
                            Property::Namespace => Some(ctx.namespace),
                            Property::Period => Some(ctx.period),
                            Property::Region => Some(ctx.region),
                            Property::Stat => Some(ctx.stat),
                            Property::Dimension(name) => ctx.dimension(name),
                            Property::Other => None,
                        };
                        result.push_str(resolved.unwrap_or(raw));
                    }
                },
            }
        }
        result
    }
}

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

fn label_segments(input: &str) -> NomResult<'_, Vec<LabelSegment>> {
    fold_many0(
        alt((placeholder_segment, literal_run, lone_dollar)),
        Vec::new,
        |mut segments: Vec<LabelSegment>, segment: LabelSegment| {
            if let LabelSegment::Literal(text) = &segment
                && let Some(LabelSegment::Literal(existing)) = segments.last_mut()
            {
                existing.push_str(text);
                return segments;
            }
            segments.push(segment);
            segments
        },
    )
    .parse(input)
}

fn placeholder_segment(input: &str) -> NomResult<'_, LabelSegment> {
    context(
        "label placeholder",
        map(
            consumed(delimited(
                tag("${"),
                delimited(multispace0, placeholder, multispace0),
                char('}'),
            )),
            |(raw, placeholder): (&str, Placeholder)| LabelSegment::Placeholder {
                raw: raw.to_string(),
                placeholder,
            },
        ),
    )
    .parse(input)
}

fn placeholder(input: &str) -> NomResult<'_, Placeholder> {
    alt((
        prop_placeholder,
        value(Placeholder::Label, tag("LABEL")),
        value(
            Placeholder::Stat(SeriesStat::DatapointCount),
            tag("DATAPOINT_COUNT"),
        ),
        value(Placeholder::Stat(SeriesStat::Min), tag("MIN")),
        value(Placeholder::Stat(SeriesStat::Max), tag("MAX")),
        value(Placeholder::Stat(SeriesStat::Avg), tag("AVG")),
        value(Placeholder::Stat(SeriesStat::Sum), tag("SUM")),
        value(Placeholder::Stat(SeriesStat::First), tag("FIRST")),
        value(Placeholder::Stat(SeriesStat::Last), tag("LAST")),
    ))
    .parse(input)
}

fn prop_placeholder(input: &str) -> NomResult<'_, Placeholder> {
    map(
        preceded(
            tag("PROP("),
            terminated(
                delimited(multispace0, quoted_name, multispace0),
                char(')'),
            ),
        ),
        |name: &str| Placeholder::Prop(Property::from_name(name)),
    )
    .parse(input)
}

fn quoted_name(input: &str) -> NomResult<'_, &str> {
    alt((
        delimited(char('\''), take_while(|ch: char| ch != '\''), char('\'')),
        delimited(char('"'), take_while(|ch: char| ch != '"'), char('"')),
    ))
    .parse(input)
}

fn literal_run(input: &str) -> NomResult<'_, LabelSegment> {
    map(take_while1(|ch: char| ch != '$'), |text: &str| {
        LabelSegment::Literal(text.to_string())
    })
    .parse(input)
}

fn lone_dollar(input: &str) -> NomResult<'_, LabelSegment> {
    map(tag("$"), |text: &str| LabelSegment::Literal(text.to_string())).parse(input)
}
