// Copyright (c) 2021-2025 RBB S.r.l
// opensource@mintlayer.org
// SPDX-License-Identifier: MIT
// Licensed under the MIT License;
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://github.com/mintlayer/mintlayer-core/blob/master/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! LDAP-style filter expressions used to select services by their properties.
//!
//! Supported syntax: `(key=value)`, `(key=*)`, `(key=pre*mid*post)`, `(key>=value)`,
//! `(key<=value)`, `(key~=value)`, `(&...)`, `(|...)` and `(!...)`. Special characters in
//! values are escaped with a backslash.

use std::str::FromStr;

use itertools::Itertools;

use crate::{Properties, PropertyValue};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unexpected end of filter '{0}'")]
    UnexpectedEnd(String),
    #[error("Unexpected character '{found}' at position {position} in filter '{filter}'")]
    UnexpectedChar {
        filter: String,
        position: usize,
        found: char,
    },
    #[error("Empty attribute name at position {position} in filter '{filter}'")]
    EmptyAttribute { filter: String, position: usize },
    #[error("Trailing characters after position {position} in filter '{filter}'")]
    TrailingInput { filter: String, position: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Equal(String, String),
    Approx(String, String),
    GreaterEq(String, String),
    LessEq(String, String),
    // Pattern parts separated by `*`; the first and last may be empty.
    Substring(String, Vec<String>),
}

/// A parsed filter; displays as the source text it was parsed from.
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    root: Node,
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Filter {
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            source,
            chars: source.chars().collect(),
            pos: 0,
        };
        parser.skip_whitespace();
        let root = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(FilterError::TrailingInput {
                filter: source.to_owned(),
                position: parser.pos,
            });
        }
        Ok(Self {
            source: source.to_owned(),
            root,
        })
    }

    /// Filter selecting `key=value` exactly, with `value` escaped as needed.
    pub fn equals(key: &str, value: &str) -> Self {
        let escaped: String = value
            .chars()
            .flat_map(|c| match c {
                '(' | ')' | '*' | '\\' => vec!['\\', c],
                c => vec![c],
            })
            .collect();
        Self {
            source: format!("({key}={escaped})"),
            root: Node::Equal(key.to_lowercase(), value.to_owned()),
        }
    }

    /// Conjunction of several filters.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        let filters: Vec<Filter> = filters.into_iter().collect();
        let source = format!("(&{})", filters.iter().map(|f| f.source.as_str()).join(""));
        Self {
            source,
            root: Node::And(filters.into_iter().map(|f| f.root).collect()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, props: &Properties) -> bool {
        self.root.matches(props)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl Node {
    fn matches(&self, props: &Properties) -> bool {
        match self {
            Node::And(nodes) => nodes.iter().all(|node| node.matches(props)),
            Node::Or(nodes) => nodes.iter().any(|node| node.matches(props)),
            Node::Not(node) => !node.matches(props),
            Node::Present(key) => props.contains_key(key),
            Node::Equal(key, expected) => compare(props, key, |v| value_equals(v, expected)),
            Node::Approx(key, expected) => compare(props, key, |v| value_approx(v, expected)),
            Node::GreaterEq(key, expected) => compare(props, key, |v| {
                value_order(v, expected).is_some_and(|ord| ord.is_ge())
            }),
            Node::LessEq(key, expected) => compare(props, key, |v| {
                value_order(v, expected).is_some_and(|ord| ord.is_le())
            }),
            Node::Substring(key, parts) => compare(props, key, |v| match v {
                PropertyValue::String(s) => wildcard_match(s, parts),
                _ => false,
            }),
        }
    }
}

/// Apply `pred` to the property value, or to any element when the value is a list.
fn compare(props: &Properties, key: &str, pred: impl Fn(&PropertyValue) -> bool) -> bool {
    match props.get(key) {
        None => false,
        Some(PropertyValue::List(items)) => items.iter().any(&pred),
        Some(value) => pred(value),
    }
}

fn value_equals(value: &PropertyValue, expected: &str) -> bool {
    match value {
        PropertyValue::String(s) => s == expected,
        PropertyValue::Int(v) => expected.trim().parse::<i64>().is_ok_and(|e| e == *v),
        PropertyValue::Float(v) => expected.trim().parse::<f64>().is_ok_and(|e| e == *v),
        PropertyValue::Bool(v) => {
            expected.trim().eq_ignore_ascii_case(if *v { "true" } else { "false" })
        }
        PropertyValue::List(_) | PropertyValue::Map(_) => false,
    }
}

fn value_approx(value: &PropertyValue, expected: &str) -> bool {
    match value {
        PropertyValue::String(s) => {
            let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            strip(s).eq_ignore_ascii_case(&strip(expected))
        }
        other => value_equals(other, expected),
    }
}

fn value_order(value: &PropertyValue, expected: &str) -> Option<std::cmp::Ordering> {
    match value {
        PropertyValue::String(s) => Some(s.as_str().cmp(expected)),
        PropertyValue::Int(v) => expected.trim().parse::<i64>().ok().map(|e| v.cmp(&e)),
        PropertyValue::Float(v) => {
            expected.trim().parse::<f64>().ok().and_then(|e| v.partial_cmp(&e))
        }
        PropertyValue::Bool(_) | PropertyValue::List(_) | PropertyValue::Map(_) => None,
    }
}

fn wildcard_match(text: &str, parts: &[String]) -> bool {
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = text.strip_prefix(first.as_str()) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn unexpected_end(&self) -> FilterError {
        FilterError::UnexpectedEnd(self.source.to_owned())
    }

    fn unexpected_char(&self, found: char) -> FilterError {
        FilterError::UnexpectedChar {
            filter: self.source.to_owned(),
            position: self.pos,
            found,
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.unexpected_char(c)),
            None => Err(self.unexpected_end()),
        }
    }

    fn parse_filter(&mut self) -> Result<Node, FilterError> {
        self.expect('(')?;
        self.skip_whitespace();
        let node = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Node::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Node::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_whitespace();
                Node::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.unexpected_end()),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(node)
    }

    fn parse_list(&mut self) -> Result<Vec<Node>, FilterError> {
        let mut nodes = Vec::new();
        self.skip_whitespace();
        while self.peek() == Some('(') {
            nodes.push(self.parse_filter()?);
            self.skip_whitespace();
        }
        if nodes.is_empty() {
            return match self.peek() {
                Some(c) => Err(self.unexpected_char(c)),
                None => Err(self.unexpected_end()),
            };
        }
        Ok(nodes)
    }

    fn parse_item(&mut self) -> Result<Node, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let key: String =
            self.chars[start..self.pos].iter().collect::<String>().trim().to_lowercase();
        if key.is_empty() {
            return Err(FilterError::EmptyAttribute {
                filter: self.source.to_owned(),
                position: start,
            });
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('<' | '>' | '~')) => {
                self.pos += 1;
                self.expect('=')?;
                c
            }
            Some(c) => return Err(self.unexpected_char(c)),
            None => return Err(self.unexpected_end()),
        };

        let parts = self.parse_value()?;
        let node = match op {
            '=' if parts.len() == 2 && parts.iter().all(String::is_empty) => Node::Present(key),
            '=' if parts.len() > 1 => Node::Substring(key, parts),
            _ => {
                // Wildcards are literal for ordering and approximate operators.
                let value = parts.join("*");
                match op {
                    '<' => Node::LessEq(key, value),
                    '>' => Node::GreaterEq(key, value),
                    '~' => Node::Approx(key, value),
                    _ => Node::Equal(key, value),
                }
            }
        };
        Ok(node)
    }

    /// Parse a value up to the closing parenthesis, split at unescaped `*`.
    fn parse_value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.unexpected_end()),
                Some(')') => break,
                Some('(') => return Err(self.unexpected_char('(')),
                Some('*') => {
                    self.pos += 1;
                    parts.push(String::new());
                }
                Some('\\') => {
                    self.pos += 1;
                    let c = self.peek().ok_or_else(|| self.unexpected_end())?;
                    self.pos += 1;
                    push_char(&mut parts, c);
                }
                Some(c) => {
                    self.pos += 1;
                    push_char(&mut parts, c);
                }
            }
        }
        Ok(parts)
    }
}

fn push_char(parts: &mut [String], c: char) {
    if let Some(last) = parts.last_mut() {
        last.push(c);
    }
}
