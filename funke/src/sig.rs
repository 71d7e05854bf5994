//! Persisted function-signature records.
//!
//! The compiler shares static type/arity information across independently
//! compiled modules through a small line-oriented format, one record per
//! line, whitespace-delimited:
//!
//! ```text
//! <kind> <mangled-name> <ret> <count> <param>...
//! ```
//!
//! `<count>` is the number of parameter tokens that follow; a `*` token
//! means the function is variadic. Records are consumed at the symbol/
//! call-dispatch boundary to validate arity before a call is emitted or
//! accepted. Malformed lines are plain parse errors, not raised runtime
//! conditions.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigRecord {
    /// Record-kind keyword (`fn`, `method`, …) — opaque to the runtime.
    pub kind: String,
    pub name: String,
    /// Return-type placeholder token.
    pub ret: String,
    pub params: Vec<String>,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigError {
    MissingField { line: String },
    BadCount { token: String },
    TruncatedParams { expected: usize, got: usize },
}

impl fmt::Display for SigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigError::MissingField { line } => write!(f, "missing field in record {line:?}"),
            SigError::BadCount { token } => write!(f, "bad parameter count {token:?}"),
            SigError::TruncatedParams { expected, got } => {
                write!(f, "expected {expected} parameter tokens, got {got}")
            }
        }
    }
}

impl std::error::Error for SigError {}

impl SigRecord {
    pub fn parse(line: &str) -> Result<Self, SigError> {
        let mut tokens = line.split_whitespace();
        let mut next = |_what: &str| {
            tokens.next().ok_or_else(|| SigError::MissingField {
                line: line.to_owned(),
            })
        };
        let kind = next("kind")?.to_owned();
        let name = next("name")?.to_owned();
        let ret = next("ret")?.to_owned();
        let count_token = next("count")?;
        let count: usize = count_token.parse().map_err(|_| SigError::BadCount {
            token: count_token.to_owned(),
        })?;

        let mut params = Vec::with_capacity(count);
        let mut variadic = false;
        for got in 0..count {
            let token = tokens.next().ok_or(SigError::TruncatedParams {
                expected: count,
                got,
            })?;
            if token == "*" {
                variadic = true;
            }
            params.push(token.to_owned());
        }
        Ok(Self {
            kind,
            name,
            ret,
            params,
            variadic,
        })
    }

    /// Whether a call with `argc` arguments satisfies this signature:
    /// exact for fixed arity, `count − 1` or more when variadic.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.variadic {
            argc >= self.params.len().saturating_sub(1)
        } else {
            argc == self.params.len()
        }
    }
}

impl fmt::Display for SigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.kind,
            self.name,
            self.ret,
            self.params.len()
        )?;
        for p in &self.params {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}
