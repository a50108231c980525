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

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::map,
    error::{Error as NomError, context},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated},
};

const SEARCH_CALL: &str = "SEARCH(";

/// Arguments of a `SEARCH('<query>', '<stat>', <period>)` call found inside
/// a metric math expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchExpression {
    pub query: String,
    pub statistic: Option<String>,
    pub period: Option<String>,
}

impl SearchExpression {
    pub fn parse(expression: &str) -> Option<Self> {
        let start = expression.find(SEARCH_CALL)?;
        let (_, args) = search_call(&expression[start..]).ok()?;
        let mut args = args.into_iter();
        let query = args.next()?;
        let statistic = args.next().filter(|value| !value.is_empty());
        let period = args.next().filter(|value| !value.is_empty());
        Some(Self {
            query,
            statistic,
            period,
        })
    }
}

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

fn search_call(input: &str) -> NomResult<'_, Vec<String>> {
    context(
        "search call",
        preceded(
            pair(tag("SEARCH"), preceded(multispace0, char('('))),
            terminated(
                separated_list1(
                    preceded(multispace0, char(',')),
                    preceded(multispace0, argument),
                ),
                preceded(multispace0, char(')')),
            ),
        ),
    )
    .parse(input)
}

fn argument(input: &str) -> NomResult<'_, String> {
    context(
        "search argument",
        alt((single_quoted, double_quoted, bare_argument)),
    )
    .parse(input)
}

fn single_quoted(input: &str) -> NomResult<'_, String> {
    map(
        delimited(char('\''), take_while(|ch: char| ch != '\''), char('\'')),
        |value: &str| value.to_string(),
    )
    .parse(input)
}

fn double_quoted(input: &str) -> NomResult<'_, String> {
    map(
        delimited(char('"'), take_while(|ch: char| ch != '"'), char('"')),
        |value: &str| value.to_string(),
    )
    .parse(input)
}

fn bare_argument(input: &str) -> NomResult<'_, String> {
    map(
        take_while1(|ch: char| ch != ',' && ch != ')' && !ch.is_whitespace()),
        |value: &str| value.to_string(),
    )
    .parse(input)
}
