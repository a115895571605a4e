//! Search query document
//!
//! Two shapes are accepted:
//!
//! ```json
//! {"query": {"must": {...}, "should": {...}}, "from": 0, "size": 10}
//! {"must": {...}, "should": {...}, "from": 0, "size": 10}
//! ```
//!
//! Each group holds `fields`, `terms` and `ranges` lists. An empty document
//! matches everything.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// `{key: {operator: operand}}` items used by `fields` and `ranges`
pub type Comparisons = BTreeMap<String, BTreeMap<String, Value>>;

/// `{key: value}` containment items used by `terms`
pub type Terms = Map<String, Value>;

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One `must` or `should` group
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Clause {
    /// Column comparisons
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<Comparisons>,

    /// Containment on `data` entries
    #[serde(default, deserialize_with = "null_as_default")]
    pub terms: Vec<Terms>,

    /// Comparison and membership on `data` entries
    #[serde(default, deserialize_with = "null_as_default")]
    pub ranges: Vec<Comparisons>,
}

impl Clause {
    /// Whether the group constrains nothing
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.terms.is_empty() && self.ranges.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroups {
    #[serde(default, deserialize_with = "null_as_default")]
    must: Clause,
    #[serde(default, deserialize_with = "null_as_default")]
    should: Clause,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQuery {
    #[serde(default)]
    query: Option<RawGroups>,
    #[serde(default)]
    must: Option<Clause>,
    #[serde(default)]
    should: Option<Clause>,
    #[serde(default)]
    from: Option<i64>,
    #[serde(default)]
    size: Option<i64>,
}

/// Serde accepts sequences for structs, so `[]` or `[null, 5]` would
/// otherwise parse positionally. The document and its groups must be objects.
fn check_object_shape(document: &Value) -> Result<()> {
    let Value::Object(top) = document else {
        return Err(Error::InvalidQuery(
            "Query document must be a JSON object".to_string(),
        ));
    };

    let mut groups = vec![("must", top.get("must")), ("should", top.get("should"))];
    match top.get("query") {
        None | Some(Value::Null) => {}
        Some(Value::Object(wrapped)) => {
            groups.push(("must", wrapped.get("must")));
            groups.push(("should", wrapped.get("should")));
        }
        Some(_) => {
            return Err(Error::InvalidQuery("\"query\" must be an object".to_string()));
        }
    }

    for (name, group) in groups {
        if let Some(group) = group {
            if !matches!(group, Value::Object(_) | Value::Null) {
                return Err(Error::InvalidQuery(format!("\"{name}\" must be an object")));
            }
        }
    }
    Ok(())
}

/// Parsed query document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Conjoined group
    pub must: Clause,

    /// Disjoined group
    pub should: Clause,

    /// Rows to skip
    pub from: Option<i64>,

    /// Max rows to return
    pub size: Option<i64>,
}

impl SearchQuery {
    /// Parse a raw request body; blank input matches everything
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let document: Value = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidQuery(format!("Malformed query document: {}", e)))?;
        check_object_shape(&document)?;

        let raw: RawQuery = serde_json::from_value(document)
            .map_err(|e| Error::InvalidQuery(format!("Malformed query document: {}", e)))?;

        let (must, should) = match raw.query {
            Some(_) if raw.must.is_some() || raw.should.is_some() => {
                return Err(Error::InvalidQuery(
                    "Use either a \"query\" wrapper or top-level must/should, not both".to_string(),
                ));
            }
            Some(groups) => (groups.must, groups.should),
            None => (raw.must.unwrap_or_default(), raw.should.unwrap_or_default()),
        };

        Ok(Self {
            must,
            should,
            from: raw.from,
            size: raw.size,
        })
    }

    /// Whether neither group constrains anything
    pub fn is_match_all(&self) -> bool {
        self.must.is_empty() && self.should.is_empty()
    }
}
