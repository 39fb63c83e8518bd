//! A small, table-driven option parser for the kernel's own configuration
//! surface (worker count, timestep, throttle horizon, dealloc threshold,
//! transport variant — see `config.rs`). Deliberately not built on a general
//! CLI framework: the kernel always knows its complete, fixed option table
//! up front, exactly the shape the original argument parser this is ported
//! from takes.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    Long,
    Double,
    Str,
    StrList,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    StrList(Vec<String>),
}

/// One row of the option table: the flag string, its kind, and a default.
pub struct ArgSpec {
    pub flag: &'static str,
    pub kind: ArgKind,
    pub default: ArgValue,
    pub help: &'static str,
}

#[derive(Debug)]
pub struct ArgParseError(pub String);

impl fmt::Display for ArgParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ArgParseError {}

pub struct ArgParser {
    specs: Vec<ArgSpec>,
}

impl ArgParser {
    pub fn new(specs: Vec<ArgSpec>) -> Self {
        Self { specs }
    }

    /// Parses `argv` (excluding argv[0]) against the option table, returning
    /// a map from flag to value. Unrecognized flags are an error; flags not
    /// present on the command line take their table default.
    pub fn parse<I, S>(&self, argv: I) -> Result<BTreeMap<String, ArgValue>, ArgParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: BTreeMap<String, ArgValue> = self
            .specs
            .iter()
            .map(|s| (s.flag.to_string(), s.default.clone()))
            .collect();

        let tokens: Vec<String> = argv.into_iter().map(|s| s.as_ref().to_string()).collect();
        let mut i = 0;
        while i < tokens.len() {
            let flag = &tokens[i];
            let spec = self
                .specs
                .iter()
                .find(|s| s.flag == flag)
                .ok_or_else(|| ArgParseError(format!("unrecognized option: {flag}")))?;
            i += 1;
            let value = match spec.kind {
                ArgKind::Bool => ArgValue::Bool(true),
                ArgKind::Int => {
                    let raw = Self::next(&tokens, &mut i, flag)?;
                    ArgValue::Int(raw.parse().map_err(|_| ArgParseError(format!("{flag}: not an int: {raw}")))?)
                }
                ArgKind::Long => {
                    let raw = Self::next(&tokens, &mut i, flag)?;
                    ArgValue::Long(raw.parse().map_err(|_| ArgParseError(format!("{flag}: not a long: {raw}")))?)
                }
                ArgKind::Double => {
                    let raw = Self::next(&tokens, &mut i, flag)?;
                    ArgValue::Double(raw.parse().map_err(|_| ArgParseError(format!("{flag}: not a double: {raw}")))?)
                }
                ArgKind::Str => ArgValue::Str(Self::next(&tokens, &mut i, flag)?),
                ArgKind::StrList => {
                    let raw = Self::next(&tokens, &mut i, flag)?;
                    ArgValue::StrList(raw.split(',').map(str::to_string).collect())
                }
            };
            out.insert(spec.flag.to_string(), value);
        }
        Ok(out)
    }

    fn next(tokens: &[String], i: &mut usize, flag: &str) -> Result<String, ArgParseError> {
        let v = tokens
            .get(*i)
            .cloned()
            .ok_or_else(|| ArgParseError(format!("{flag}: missing value")))?;
        *i += 1;
        Ok(v)
    }
}
