// Copyright 2018 The dirwatch Authors.
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

//! Parsing of raw audit text into records.
//!
//! An audit record body looks like
//!
//! ```text
//! audit(1700000000.123:42): arch=c000003e uid=1000 key="w/home/alice"
//! ```
//!
//! that is, a header carrying a timestamp and a sequence number, then
//! space-separated `key=value` parameters. Values may be quoted with `'`
//! or `"`; inside a quoted value a backslash escapes the next character.
//! The parser produces the two integers and the parameter map and
//! interprets nothing else; the sub-second part of the timestamp is
//! discarded.

use std::collections::BTreeMap;
use std::fmt;

/// One parsed audit record. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Seconds since the epoch.
    pub timestamp: i64,
    /// Identifies the event this record belongs to.
    pub sequence_number: u64,
    /// The `key=value` parameters. Keys are unique within a record.
    pub params: BTreeMap<String, String>,
}

/// The ways a record body can fail to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A fixed part of the header was not where it should be.
    Expected(&'static str),
    /// A header integer did not fit its type.
    BadNumber,
    /// A parameter with no key, as in `=value`.
    EmptyKey,
    /// A space inside a parameter key.
    SpaceInKey,
    /// The same key appeared twice.
    DuplicateKey(String),
    /// Input ended inside a quoted value.
    UnterminatedValue,
    /// A closing quote followed by something other than a space.
    AfterQuotedValue(char),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseError::Expected(what) => write!(f, "expected '{}'", what),
            ParseError::BadNumber => write!(f, "number out of range"),
            ParseError::EmptyKey => write!(f, "missing parameter key"),
            ParseError::SpaceInKey => write!(f, "space in parameter key"),
            ParseError::DuplicateKey(ref key) => write!(f, "duplicate key '{}'", key),
            ParseError::UnterminatedValue => write!(f, "unterminated quoted value"),
            ParseError::AfterQuotedValue(c) => {
                write!(f, "unexpected '{}' after quoted value", c)
            }
        }
    }
}

/// A cursor over the unconsumed tail of the input.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let mut chars = self.rest.chars();
        let c = chars.next()?;
        self.rest = chars.as_str();
        Some(c)
    }

    fn eat(&mut self, lit: &'static str) -> Result<(), ParseError> {
        if self.rest.starts_with(lit) {
            self.rest = &self.rest[lit.len()..];
            Ok(())
        } else {
            Err(ParseError::Expected(lit))
        }
    }

    fn digits(&mut self) -> Result<&'a str, ParseError> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(ParseError::Expected("a number"));
        }
        let (num, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(num)
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }
}

impl Record {
    /// Parses one record body.
    pub fn parse(data: &str) -> Result<Record, ParseError> {
        let mut s = Scanner { rest: data };

        s.eat("audit(")?;
        let timestamp = s.digits()?.parse::<i64>().map_err(|_| ParseError::BadNumber)?;
        s.eat(".")?;
        let _fraction = s.digits()?;
        s.eat(":")?;
        let sequence_number = s.digits()?.parse::<u64>().map_err(|_| ParseError::BadNumber)?;
        s.eat("): ")?;

        let mut params = BTreeMap::new();
        while !s.at_end() {
            let mut key = String::new();
            loop {
                match s.bump() {
                    Some('=') => break,
                    Some(' ') => return Err(ParseError::SpaceInKey),
                    Some(c) => key.push(c),
                    None => return Err(ParseError::Expected("=")),
                }
            }
            if key.is_empty() {
                return Err(ParseError::EmptyKey);
            }
            if params.contains_key(&key) {
                return Err(ParseError::DuplicateKey(key));
            }

            let value = match s.peek() {
                Some(quote) if quote == '\'' || quote == '"' => {
                    s.bump();
                    let mut value = String::new();
                    loop {
                        let c = s.bump().ok_or(ParseError::UnterminatedValue)?;
                        if c == '\\' {
                            let next = s.bump().ok_or(ParseError::UnterminatedValue)?;
                            value.push(next);
                        } else if c == quote {
                            break;
                        } else {
                            value.push(c);
                        }
                    }
                    match s.bump() {
                        None | Some(' ') => (),
                        Some(c) => return Err(ParseError::AfterQuotedValue(c)),
                    }
                    value
                }
                _ => {
                    let mut value = String::new();
                    loop {
                        match s.bump() {
                            None | Some(' ') => break,
                            Some(c) => value.push(c),
                        }
                    }
                    value
                }
            };

            params.insert(key, value);
        }

        Ok(Record { timestamp, sequence_number, params })
    }

    /// Convenience lookup into the parameter map.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|v| v.as_str())
    }
}
