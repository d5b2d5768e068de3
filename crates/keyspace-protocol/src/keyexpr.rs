//! Hierarchical keys and key patterns.
//!
//! A key expression is a `/`-separated path such as `/demo/sensor/temp`.
//! Two segments are special:
//!
//! - `*` matches exactly one segment
//! - `**` matches any number of segments, including zero
//!
//! Wildcards are whole segments only: `/a/b*` is rejected rather than being
//! treated as a prefix match.
//!
//! Matching walks the two segment lists with a small dynamic-programming
//! table, so the cost is bounded by the product of the two depths no matter
//! how many `**` segments appear.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

const SINGLE_WILD: &str = "*";
const MULTI_WILD: &str = "**";

/// A validated key or key pattern.
///
/// Rules:
/// - starts with `/`
/// - no empty segments (`//`) and no trailing `/`, except the root `/`
/// - `*` and `**` only as whole segments
/// - no `?`, which separates a key from a query predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyExpr(String);

impl KeyExpr {
    /// Validates and wraps a key expression.
    pub fn new(expr: impl Into<String>) -> Result<Self, ProtocolError> {
        let expr = expr.into();
        validate(&expr)?;
        Ok(Self(expr))
    }

    /// Returns the expression as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if any segment is `*` or `**`.
    pub fn is_wild(&self) -> bool {
        segments(&self.0)
            .iter()
            .any(|s| *s == SINGLE_WILD || *s == MULTI_WILD)
    }

    /// Returns `true` if the two expressions match at least one common key.
    pub fn intersects(&self, other: &KeyExpr) -> bool {
        intersect(&self.0, &other.0)
    }

    /// Consumes the wrapper and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for KeyExpr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = ProtocolError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&String> for KeyExpr {
    type Error = ProtocolError;

    fn try_from(s: &String) -> Result<Self, Self::Error> {
        Self::new(s.as_str())
    }
}

impl From<KeyExpr> for String {
    fn from(k: KeyExpr) -> Self {
        k.0
    }
}

fn validate(expr: &str) -> Result<(), ProtocolError> {
    let invalid = || ProtocolError::InvalidKeyExpr(expr.to_string());

    if !expr.starts_with('/') || expr.contains('?') {
        return Err(invalid());
    }
    if expr == "/" {
        return Ok(());
    }
    for segment in expr[1..].split('/') {
        if segment.is_empty() {
            return Err(invalid());
        }
        if segment.contains('*')
            && segment != SINGLE_WILD
            && segment != MULTI_WILD
        {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Splits a key into its segments. The root `/` has none.
fn segments(expr: &str) -> Vec<&str> {
    match expr.strip_prefix('/').unwrap_or(expr) {
        "" => Vec::new(),
        rest => rest.split('/').collect(),
    }
}

#[inline]
fn chunk_intersect(a: &str, b: &str) -> bool {
    a == SINGLE_WILD || b == SINGLE_WILD || a == b
}

/// Returns `true` if the two key expressions match at least one common key.
///
/// Both sides may contain wildcards, which is what query routing needs: a
/// query on `/a/**` must reach a queryable declared on `/*/b`. Against a
/// concrete key this is plain pattern matching.
pub fn intersect(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    let (n, m) = (a.len(), b.len());
    let width = m + 1;

    // table[i * width + j] holds "a[i..] intersects b[j..]".
    let mut table = vec![false; (n + 1) * width];
    table[n * width + m] = true;

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            let at = |i: usize, j: usize| table[i * width + j];
            let value = if i < n && a[i] == MULTI_WILD {
                // `**` swallows nothing, or one more segment of b.
                at(i + 1, j) || (j < m && at(i, j + 1))
            } else if j < m && b[j] == MULTI_WILD {
                at(i, j + 1) || (i < n && at(i + 1, j))
            } else if i < n && j < m {
                chunk_intersect(a[i], b[j]) && at(i + 1, j + 1)
            } else {
                false
            };
            table[i * width + j] = value;
        }
    }

    table[0]
}
