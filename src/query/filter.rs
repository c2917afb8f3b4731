//! Composite filters produced by the requirement compiler.
//!
//! A [`Filter`] is a conjunction of positive clauses and negated clauses. It
//! can be evaluated directly against documents (used by the in-memory store)
//! or rendered as an Elasticsearch-style `bool` query for external backends.

use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use crate::document::DeviceDescription;

use super::geo::{GeoPoint, GeoPolygon};

/// Upper bound for compiled wildcard programs.
const WILDCARD_SIZE_LIMIT: usize = 1 << 20;

/// A wildcard pattern where `*` matches any sequence and `?` one character.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    pattern: String,
    case_insensitive: bool,
    regex: Regex,
}

impl WildcardPattern {
    /// Compiles a wildcard pattern. Returns `None` if the pattern is too large.
    #[must_use]
    pub fn new(pattern: &str, case_insensitive: bool) -> Option<Self> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        for c in pattern.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        source.push('$');

        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .dot_matches_new_line(true)
            .size_limit(WILDCARD_SIZE_LIMIT)
            .build()
            .ok()?;

        Some(Self {
            pattern: pattern.to_string(),
            case_insensitive,
            regex,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Tests a string against the pattern.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for WildcardPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.case_insensitive == other.case_insensitive
    }
}

/// A single filter clause over a dotted document field.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// String field matches a wildcard pattern.
    Wildcard {
        field: String,
        pattern: WildcardPattern,
    },

    /// Geo point field lies within `radius_meters` of `center`.
    GeoDistance {
        field: String,
        center: GeoPoint,
        radius_meters: f64,
    },

    /// Geo point field lies within a polygon.
    GeoWithin {
        field: String,
        polygon: GeoPolygon,
    },
}

impl Clause {
    /// The dotted field path this clause inspects.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Wildcard { field, .. }
            | Self::GeoDistance { field, .. }
            | Self::GeoWithin { field, .. } => field,
        }
    }

    /// Evaluates the clause against a document.
    ///
    /// Array-valued fields match if any element matches.
    #[must_use]
    pub fn matches(&self, doc: &DeviceDescription) -> bool {
        let Some(value) = doc.field(self.field()) else {
            return false;
        };

        match self {
            Self::Wildcard { pattern, .. } => match value {
                Value::String(s) => pattern.is_match(s),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| pattern.is_match(s)),
                _ => false,
            },
            Self::GeoDistance {
                center,
                radius_meters,
                ..
            } => geo_points(value)
                .iter()
                .any(|p| center.distance_meters(p) <= *radius_meters),
            Self::GeoWithin { polygon, .. } => geo_points(value).iter().any(|p| polygon.contains(p)),
        }
    }

    /// Renders the clause in Elasticsearch query DSL.
    #[must_use]
    pub fn to_query_dsl(&self) -> Value {
        match self {
            Self::Wildcard { field, pattern } => json!({
                "wildcard": {
                    field.as_str(): {
                        "value": pattern.pattern(),
                        "case_insensitive": pattern.case_insensitive,
                    }
                }
            }),
            Self::GeoDistance {
                field,
                center,
                radius_meters,
            } => json!({
                "geo_distance": {
                    "distance": format!("{radius_meters}m"),
                    field.as_str(): { "lat": center.lat, "lon": center.lon },
                }
            }),
            Self::GeoWithin { field, polygon } => json!({
                "geo_shape": {
                    field.as_str(): {
                        "shape": { "type": "polygon", "coordinates": [polygon.closed_ring()] },
                        "relation": "within",
                    }
                }
            }),
        }
    }
}

fn geo_points(value: &Value) -> Vec<GeoPoint> {
    if let Some(point) = GeoPoint::from_value(value) {
        return vec![point];
    }
    match value {
        Value::Array(items) => items.iter().filter_map(GeoPoint::from_value).collect(),
        _ => Vec::new(),
    }
}

/// Conjunction of clauses. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    must: Vec<Clause>,
    must_not: Vec<Clause>,
}

impl Filter {
    /// A filter without clauses.
    #[must_use]
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Returns true if the filter has no clauses.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Positive clauses; all must match.
    #[must_use]
    pub fn must(&self) -> &[Clause] {
        &self.must
    }

    /// Negated clauses; none may match.
    #[must_use]
    pub fn must_not(&self) -> &[Clause] {
        &self.must_not
    }

    /// Total number of clauses.
    #[must_use]
    pub fn clause_count(&self) -> usize {
        self.must.len() + self.must_not.len()
    }

    /// Evaluates the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &DeviceDescription) -> bool {
        self.must.iter().all(|c| c.matches(doc)) && !self.must_not.iter().any(|c| c.matches(doc))
    }

    /// Renders the filter as an Elasticsearch `bool` query.
    #[must_use]
    pub fn to_query_dsl(&self) -> Value {
        if self.is_match_all() {
            return json!({ "match_all": {} });
        }
        let filter: Vec<Value> = self.must.iter().map(Clause::to_query_dsl).collect();
        let must_not: Vec<Value> = self.must_not.iter().map(Clause::to_query_dsl).collect();
        json!({ "bool": { "filter": filter, "must_not": must_not } })
    }
}

/// Append-only builder shared by requirement parsers.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    filter: Filter,
}

impl FilterBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause that must match.
    pub fn filter(&mut self, clause: Clause) -> &mut Self {
        self.filter.must.push(clause);
        self
    }

    /// Adds a clause that must not match.
    pub fn must_not(&mut self, clause: Clause) -> &mut Self {
        self.filter.must_not.push(clause);
        self
    }

    /// Number of clauses added so far.
    #[must_use]
    pub fn clause_count(&self) -> usize {
        self.filter.clause_count()
    }

    /// Finishes the filter.
    #[must_use]
    pub fn build(self) -> Filter {
        self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> DeviceDescription {
        DeviceDescription::from_value(value).unwrap()
    }

    fn wildcard(field: &str, pattern: &str) -> Clause {
        Clause::Wildcard {
            field: field.to_string(),
            pattern: WildcardPattern::new(pattern, true).unwrap(),
        }
    }

    #[test]
    fn wildcard_semantics() {
        let p = WildcardPattern::new("*lamp*", true).unwrap();
        assert!(p.is_match("SmartLamp42"));
        assert!(!p.is_match("SmartBulb"));

        let exact = WildcardPattern::new("a.b", false).unwrap();
        assert!(exact.is_match("a.b"));
        assert!(!exact.is_match("axb"));
        assert!(!exact.is_match("A.B"));

        let single = WildcardPattern::new("dev?", true).unwrap();
        assert!(single.is_match("dev7"));
        assert!(!single.is_match("dev77"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::match_all();
        assert!(filter.is_match_all());
        assert!(filter.matches(&doc(json!({}))));
        assert_eq!(filter.to_query_dsl(), json!({ "match_all": {} }));
    }

    #[test]
    fn must_not_excludes_matching_documents() {
        let mut builder = FilterBuilder::new();
        builder.must_not(wildcard("name", "bulb"));
        let filter = builder.build();

        assert!(filter.matches(&doc(json!({"name": "Lamp"}))));
        assert!(!filter.matches(&doc(json!({"name": "BULB"}))));
        assert!(filter.matches(&doc(json!({"description": "no name"}))));
    }

    #[test]
    fn clauses_are_combined_with_and() {
        let mut builder = FilterBuilder::new();
        builder
            .filter(wildcard("name", "*lamp*"))
            .filter(wildcard("location.description", "kitchen*"));
        let filter = builder.build();
        assert_eq!(filter.clause_count(), 2);

        assert!(filter.matches(&doc(json!({
            "name": "Lamp 1", "location": {"description": "Kitchen east"}
        }))));
        assert!(!filter.matches(&doc(json!({
            "name": "Lamp 1", "location": {"description": "Office"}
        }))));
    }

    #[test]
    fn wildcard_matches_any_array_element() {
        let clause = wildcard("tags", "sensor");
        assert!(clause.matches(&doc(json!({"tags": ["actuator", "Sensor"]}))));
        assert!(!clause.matches(&doc(json!({"tags": [1, 2]}))));
    }

    #[test]
    fn geo_clauses_evaluate_coordinates() {
        let center = GeoPoint::new(48.0, 9.0).unwrap();
        let near = Clause::GeoDistance {
            field: "location.coordinates".to_string(),
            center,
            radius_meters: 20.0,
        };
        assert!(near.matches(&doc(json!({"location": {"coordinates": {"lat": 48.0001, "lon": 9.0}}}))));
        assert!(!near.matches(&doc(json!({"location": {"coordinates": {"lat": 48.01, "lon": 9.0}}}))));
        assert!(!near.matches(&doc(json!({"location": {}}))));
    }

    #[test]
    fn renders_bool_query_dsl() {
        let mut builder = FilterBuilder::new();
        builder
            .filter(wildcard("name", "*lamp*"))
            .must_not(wildcard("description", "broken"));
        let dsl = builder.build().to_query_dsl();

        assert_eq!(
            dsl["bool"]["filter"][0]["wildcard"]["name"]["value"],
            json!("*lamp*")
        );
        assert_eq!(
            dsl["bool"]["must_not"][0]["wildcard"]["description"]["case_insensitive"],
            json!(true)
        );
    }
}
