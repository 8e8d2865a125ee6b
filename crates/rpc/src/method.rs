//! Method names of the form `"<Service>.<Method>"`.

use crate::error::{Result, RpcError};
use std::fmt;
use std::str::FromStr;

/// A validated `"<Service>.<Method>"` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodName {
    full: String,
    dot: usize,
}

impl MethodName {
    /// Parse and validate a dotted method name.
    ///
    /// Exactly one dot, both halves non-empty and free of whitespace.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || RpcError::InvalidMethod(name.to_string());

        let (service, method) = name.split_once('.').ok_or_else(invalid)?;
        if service.is_empty() || method.is_empty() || method.contains('.') {
            return Err(invalid());
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self {
            full: name.to_string(),
            dot: service.len(),
        })
    }

    pub fn service(&self) -> &str {
        &self.full[..self.dot]
    }

    pub fn method(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for MethodName {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
