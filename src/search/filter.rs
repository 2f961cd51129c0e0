//! Metadata filter expressions evaluated against a vector record's
//! metadata map.
//!
//! A [`Filter`] is either a leaf comparison (`{op, key, value}`) or a
//! boolean combinator (`and`/`or`/`not`) over nested filters. Evaluation
//! is short-circuiting: `and`/`or` stop at the first operand that
//! decides the result. Filters are validated once at construction
//! (unknown operators, depth, and `in`/`nin` set size are all rejected
//! synchronously) rather than re-checked on every `matches()` call.

use crate::error::ValidationError;
use crate::types::{Metadata, MetadataValue};

/// Maximum nesting depth of a filter expression tree.
pub const MAX_DEPTH: usize = 16;

/// Maximum number of elements in an `in`/`nin` value set.
pub const MAX_SET_SIZE: usize = 256;

/// Leaf comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Contains,
    Exists,
    MatchesPrefix,
}

impl CompareOp {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "in" => Some(Self::In),
            "nin" => Some(Self::NotIn),
            "contains" => Some(Self::Contains),
            "exists" => Some(Self::Exists),
            "matches-prefix" => Some(Self::MatchesPrefix),
            _ => None,
        }
    }
}

/// Boolean combinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

impl BoolOp {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "not" => Some(Self::Not),
            _ => None,
        }
    }
}

/// A metadata filter expression.
///
/// Build with [`Filter::leaf`]/[`Filter::and`]/[`Filter::or`]/[`Filter::not`],
/// or parse an untyped expression with [`Filter::parse`]; both paths
/// validate depth and operator legality before returning.
#[derive(Clone, Debug)]
pub enum Filter {
    /// A single key/op/value comparison.
    Leaf {
        op: CompareOp,
        key: String,
        value: Option<MetadataValue>,
        set: Vec<MetadataValue>,
    },
    /// A boolean combination of nested filters.
    Node { op: BoolOp, operands: Vec<Filter> },
}

impl Filter {
    /// Builds a leaf comparison filter.
    pub fn leaf(op: CompareOp, key: impl Into<String>, value: MetadataValue) -> Self {
        Self::Leaf {
            op,
            key: key.into(),
            value: Some(value),
            set: Vec::new(),
        }
    }

    /// Builds an `exists` leaf filter, which carries no comparison value.
    pub fn exists(key: impl Into<String>) -> Self {
        Self::Leaf {
            op: CompareOp::Exists,
            key: key.into(),
            value: None,
            set: Vec::new(),
        }
    }

    /// Builds an `in`/`nin` leaf filter over a value set.
    pub fn in_set(op: CompareOp, key: impl Into<String>, set: Vec<MetadataValue>) -> Self {
        Self::Leaf {
            op,
            key: key.into(),
            value: None,
            set,
        }
    }

    /// Combines filters with `and`.
    pub fn and(operands: Vec<Filter>) -> Self {
        Self::Node {
            op: BoolOp::And,
            operands,
        }
    }

    /// Combines filters with `or`.
    pub fn or(operands: Vec<Filter>) -> Self {
        Self::Node {
            op: BoolOp::Or,
            operands,
        }
    }

    /// Negates a filter.
    pub fn not(inner: Filter) -> Self {
        Self::Node {
            op: BoolOp::Not,
            operands: vec![inner],
        }
    }

    /// Validates operator legality, set size, and tree depth.
    ///
    /// Called by [`crate::store::VectorStore::search`] before a filter
    /// is used, so a malformed filter is rejected synchronously rather
    /// than silently matching nothing partway through a search.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at_depth(0)
    }

    fn validate_at_depth(&self, depth: usize) -> Result<(), ValidationError> {
        if depth > MAX_DEPTH {
            return Err(ValidationError::invalid_field(
                "filter",
                format!("expression depth exceeds {}", MAX_DEPTH),
            ));
        }
        match self {
            Filter::Leaf { set, .. } => {
                if set.len() > MAX_SET_SIZE {
                    return Err(ValidationError::too_many_items(
                        "filter.set",
                        set.len(),
                        MAX_SET_SIZE,
                    ));
                }
                Ok(())
            }
            Filter::Node { operands, .. } => {
                for operand in operands {
                    operand.validate_at_depth(depth + 1)?;
                }
                Ok(())
            }
        }
    }

    /// Evaluates the filter against a metadata map. `validate()` must
    /// have already succeeded; this never fails.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Filter::Leaf {
                op,
                key,
                value,
                set,
            } => Self::eval_leaf(*op, key, value.as_ref(), set, metadata),
            Filter::Node { op, operands } => match op {
                BoolOp::And => operands.iter().all(|f| f.matches(metadata)),
                BoolOp::Or => operands.iter().any(|f| f.matches(metadata)),
                BoolOp::Not => !operands[0].matches(metadata),
            },
        }
    }

    fn eval_leaf(
        op: CompareOp,
        key: &str,
        value: Option<&MetadataValue>,
        set: &[MetadataValue],
        metadata: &Metadata,
    ) -> bool {
        if op == CompareOp::Exists {
            return metadata.contains_key(key);
        }
        let actual = match metadata.get(key) {
            Some(v) => v,
            None => return false,
        };
        match op {
            CompareOp::Eq => value.map(|v| v == actual).unwrap_or(false),
            CompareOp::Ne => value.map(|v| v != actual).unwrap_or(false),
            CompareOp::Lt => compare_numeric(actual, value, |a, b| a < b),
            CompareOp::Le => compare_numeric(actual, value, |a, b| a <= b),
            CompareOp::Gt => compare_numeric(actual, value, |a, b| a > b),
            CompareOp::Ge => compare_numeric(actual, value, |a, b| a >= b),
            CompareOp::In => set.iter().any(|v| v == actual),
            CompareOp::NotIn => !set.iter().any(|v| v == actual),
            CompareOp::Contains => match (actual, value) {
                (MetadataValue::String(s), Some(MetadataValue::String(needle))) => {
                    s.contains(needle.as_str())
                }
                _ => false,
            },
            CompareOp::MatchesPrefix => match (actual, value) {
                (MetadataValue::String(s), Some(MetadataValue::String(prefix))) => {
                    s.starts_with(prefix.as_str())
                }
                _ => false,
            },
            CompareOp::Exists => unreachable!("handled above"),
        }
    }
}

fn compare_numeric(
    actual: &MetadataValue,
    value: Option<&MetadataValue>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (actual.as_number(), value.and_then(MetadataValue::as_number)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// An untyped filter expression as it might arrive from a caller (e.g.
/// deserialized from JSON), before being validated into a [`Filter`].
#[derive(Clone, Debug)]
pub struct RawFilter {
    pub op: String,
    pub key: Option<String>,
    pub value: Option<MetadataValue>,
    pub set: Option<Vec<MetadataValue>>,
    pub operands: Option<Vec<RawFilter>>,
}

impl Filter {
    /// Parses and validates a [`RawFilter`] tree, rejecting unknown
    /// operators as [`ValidationError::UnknownOperator`].
    pub fn parse(raw: &RawFilter) -> Result<Filter, ValidationError> {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &RawFilter, depth: usize) -> Result<Filter, ValidationError> {
        if depth > MAX_DEPTH {
            return Err(ValidationError::invalid_field(
                "filter",
                format!("expression depth exceeds {}", MAX_DEPTH),
            ));
        }
        if let Some(bool_op) = BoolOp::from_str(&raw.op) {
            let operands = raw
                .operands
                .as_ref()
                .ok_or_else(|| ValidationError::required_field("filter.operands"))?;
            let parsed = operands
                .iter()
                .map(|o| Self::parse_at_depth(o, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Filter::Node {
                op: bool_op,
                operands: parsed,
            });
        }
        if let Some(cmp_op) = CompareOp::from_str(&raw.op) {
            let key = raw
                .key
                .clone()
                .ok_or_else(|| ValidationError::required_field("filter.key"))?;
            let set = raw.set.clone().unwrap_or_default();
            if set.len() > MAX_SET_SIZE {
                return Err(ValidationError::too_many_items(
                    "filter.set",
                    set.len(),
                    MAX_SET_SIZE,
                ));
            }
            return Ok(Filter::Leaf {
                op: cmp_op,
                key,
                value: raw.value.clone(),
                set,
            });
        }
        Err(ValidationError::UnknownOperator(raw.op.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, MetadataValue)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eq_leaf_matches() {
        let filter = Filter::leaf(CompareOp::Eq, "color", MetadataValue::String("red".into()));
        let m = meta(&[("color", MetadataValue::String("red".into()))]);
        assert!(filter.matches(&m));
    }

    #[test]
    fn test_eq_leaf_missing_key_does_not_match() {
        let filter = Filter::leaf(CompareOp::Eq, "color", MetadataValue::String("red".into()));
        let m = meta(&[]);
        assert!(!filter.matches(&m));
    }

    #[test]
    fn test_numeric_range() {
        let filter = Filter::leaf(CompareOp::Gt, "price", MetadataValue::Number(10.0));
        let m = meta(&[("price", MetadataValue::Number(15.0))]);
        assert!(filter.matches(&m));
        let m2 = meta(&[("price", MetadataValue::Number(5.0))]);
        assert!(!filter.matches(&m2));
    }

    #[test]
    fn test_and_short_circuits() {
        let filter = Filter::and(vec![
            Filter::leaf(CompareOp::Eq, "a", MetadataValue::Bool(false)),
            Filter::exists("nonexistent-but-unreached"),
        ]);
        let m = meta(&[("a", MetadataValue::Bool(true))]);
        assert!(!filter.matches(&m));
    }

    #[test]
    fn test_or_any_match() {
        let filter = Filter::or(vec![
            Filter::leaf(CompareOp::Eq, "a", MetadataValue::Bool(true)),
            Filter::leaf(CompareOp::Eq, "b", MetadataValue::Bool(true)),
        ]);
        let m = meta(&[("b", MetadataValue::Bool(true))]);
        assert!(filter.matches(&m));
    }

    #[test]
    fn test_not_negates() {
        let filter = Filter::not(Filter::exists("tag"));
        assert!(filter.matches(&meta(&[])));
        assert!(!filter.matches(&meta(&[("tag", MetadataValue::Bool(true))])));
    }

    #[test]
    fn test_in_set() {
        let filter = Filter::in_set(
            CompareOp::In,
            "status",
            vec![
                MetadataValue::String("active".into()),
                MetadataValue::String("pending".into()),
            ],
        );
        assert!(filter.matches(&meta(&[("status", MetadataValue::String("active".into()))])));
        assert!(!filter.matches(&meta(&[("status", MetadataValue::String("closed".into()))])));
    }

    #[test]
    fn test_set_too_large_rejected() {
        let set: Vec<MetadataValue> = (0..300).map(|i| MetadataValue::Number(i as f64)).collect();
        let filter = Filter::in_set(CompareOp::In, "x", set);
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_depth_cap_rejected() {
        let mut filter = Filter::exists("leaf");
        for _ in 0..(MAX_DEPTH + 2) {
            filter = Filter::not(filter);
        }
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_parse_unknown_operator_rejected() {
        let raw = RawFilter {
            op: "bogus".into(),
            key: Some("x".into()),
            value: None,
            set: None,
            operands: None,
        };
        let err = Filter::parse(&raw).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownOperator(_)));
    }

    #[test]
    fn test_parse_and_node() {
        let raw = RawFilter {
            op: "and".into(),
            key: None,
            value: None,
            set: None,
            operands: Some(vec![
                RawFilter {
                    op: "exists".into(),
                    key: Some("a".into()),
                    value: None,
                    set: None,
                    operands: None,
                },
                RawFilter {
                    op: "eq".into(),
                    key: Some("b".into()),
                    value: Some(MetadataValue::Bool(true)),
                    set: None,
                    operands: None,
                },
            ]),
        };
        let filter = Filter::parse(&raw).unwrap();
        let m = meta(&[("a", MetadataValue::Bool(false)), ("b", MetadataValue::Bool(true))]);
        assert!(filter.matches(&m));
    }

    #[test]
    fn test_contains_and_prefix() {
        let contains = Filter::leaf(
            CompareOp::Contains,
            "name",
            MetadataValue::String("lo wo".into()),
        );
        let m = meta(&[("name", MetadataValue::String("hello world".into()))]);
        assert!(contains.matches(&m));

        let prefix = Filter::leaf(
            CompareOp::MatchesPrefix,
            "name",
            MetadataValue::String("hell".into()),
        );
        assert!(prefix.matches(&m));
    }
}
