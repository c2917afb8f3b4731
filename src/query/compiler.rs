//! Requirement compiler.
//!
//! Translates the ordered list of typed requirements of a query into one
//! composite [`Filter`]. Each requirement type is handled by a registered
//! [`RequirementParser`]; type names are matched case-insensitively and
//! requirements without a parser are skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::filter::{Filter, FilterBuilder};
use super::parsers::{LocationParser, StringMatchParser};

/// Why a parser contributed no clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A required field is absent or has the wrong type.
    MissingField(&'static str),
    /// The requirement's operator is not supported by the parser.
    UnsupportedOperator(String),
    /// Field values are present but unusable (out of range, too few vertices, ...).
    InvalidValue(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing field '{field}'"),
            Self::UnsupportedOperator(op) => write!(f, "unsupported operator '{op}'"),
            Self::InvalidValue(reason) => write!(f, "invalid value: {reason}"),
        }
    }
}

/// Result of parsing a single requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// One or more clauses were added to the builder.
    Applied,
    /// Nothing was added.
    Skipped(SkipReason),
}

impl ParseOutcome {
    /// Returns true if the requirement contributed clauses.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Parser for one requirement type.
///
/// Implementations may only append clauses to the builder.
pub trait RequirementParser: Send + Sync {
    /// The requirement type this parser handles.
    fn type_name(&self) -> &str;

    /// Adds the clauses for `requirement` to `builder`.
    fn parse(&self, builder: &mut FilterBuilder, requirement: &Map<String, Value>) -> ParseOutcome;
}

/// Registry of requirement parsers keyed by lowercase type name.
#[derive(Clone, Default)]
pub struct RequirementCompiler {
    parsers: HashMap<String, Arc<dyn RequirementParser>>,
}

impl fmt::Debug for RequirementCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirementCompiler")
            .field("types", &self.registered_types())
            .finish()
    }
}

impl RequirementCompiler {
    /// Creates a compiler without any parsers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compiler with the `name`, `description` and `location` parsers.
    #[must_use]
    pub fn with_builtin_parsers() -> Self {
        let mut compiler = Self::new();
        compiler.register(Arc::new(StringMatchParser::new("name", "name")));
        compiler.register(Arc::new(StringMatchParser::new(
            "description",
            "description",
        )));
        compiler.register(Arc::new(LocationParser::new()));
        compiler
    }

    /// Registers a parser, replacing any previous parser for the same type.
    pub fn register(&mut self, parser: Arc<dyn RequirementParser>) {
        let key = parser.type_name().to_lowercase();
        self.parsers.insert(key, parser);
    }

    /// Looks up the parser for a type name.
    #[must_use]
    pub fn parser(&self, type_name: &str) -> Option<&Arc<dyn RequirementParser>> {
        self.parsers.get(&type_name.to_lowercase())
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.parsers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Compiles requirements into a single conjunctive filter.
    ///
    /// Non-object entries, entries without a type and entries of unknown type
    /// contribute nothing. An empty result matches every document.
    #[must_use]
    pub fn compile(&self, requirements: &[Value]) -> Filter {
        let mut builder = FilterBuilder::new();

        for requirement in requirements {
            let Some(fields) = requirement.as_object() else {
                debug!("ignoring non-object requirement");
                continue;
            };
            let Some(type_name) = fields.get("type").and_then(Value::as_str) else {
                debug!("ignoring requirement without type");
                continue;
            };
            let Some(parser) = self.parser(type_name) else {
                debug!(requirement_type = type_name, "no parser registered, skipping");
                continue;
            };

            if let ParseOutcome::Skipped(reason) = parser.parse(&mut builder, fields) {
                debug!(requirement_type = type_name, %reason, "requirement skipped");
            }
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DeviceDescription;
    use crate::query::filter::{Clause, WildcardPattern};
    use serde_json::json;

    fn doc(value: Value) -> DeviceDescription {
        DeviceDescription::from_value(value).unwrap()
    }

    struct TagParser;

    impl RequirementParser for TagParser {
        fn type_name(&self) -> &str {
            "Tag"
        }

        fn parse(&self, builder: &mut FilterBuilder, requirement: &Map<String, Value>) -> ParseOutcome {
            let Some(tag) = requirement.get("tag").and_then(Value::as_str) else {
                return ParseOutcome::Skipped(SkipReason::MissingField("tag"));
            };
            let Some(pattern) = WildcardPattern::new(tag, true) else {
                return ParseOutcome::Skipped(SkipReason::InvalidValue(tag.to_string()));
            };
            builder.filter(Clause::Wildcard {
                field: "tags".to_string(),
                pattern,
            });
            ParseOutcome::Applied
        }
    }

    #[test]
    fn unknown_types_compile_to_match_all() {
        let compiler = RequirementCompiler::with_builtin_parsers();
        let filter = compiler.compile(&[
            json!({"type": "temperature", "min": 3}),
            json!({"type": "unknown"}),
            json!("not an object"),
            json!({"match": "no type"}),
        ]);
        assert!(filter.is_match_all());
    }

    #[test]
    fn empty_requirements_compile_to_match_all() {
        let compiler = RequirementCompiler::with_builtin_parsers();
        assert!(compiler.compile(&[]).is_match_all());
    }

    #[test]
    fn type_names_are_case_insensitive() {
        let compiler = RequirementCompiler::with_builtin_parsers();
        let filter = compiler.compile(&[json!({"type": "NAME", "match": "Lamp", "operator": "contains"})]);
        assert_eq!(filter.clause_count(), 1);
        assert!(filter.matches(&doc(json!({"name": "SmartLamp42"}))));
        assert!(!filter.matches(&doc(json!({"name": "SmartBulb"}))));
    }

    #[test]
    fn requirements_are_combined_with_and() {
        let compiler = RequirementCompiler::with_builtin_parsers();
        let filter = compiler.compile(&[
            json!({"type": "name", "match": "lamp", "operator": "contains"}),
            json!({"type": "description", "match": "broken", "operator": "not_equals"}),
        ]);
        assert_eq!(filter.must().len(), 1);
        assert_eq!(filter.must_not().len(), 1);

        assert!(filter.matches(&doc(json!({"name": "Lamp", "description": "fine"}))));
        assert!(!filter.matches(&doc(json!({"name": "Lamp", "description": "Broken"}))));
        assert!(!filter.matches(&doc(json!({"name": "Plug", "description": "fine"}))));
    }

    #[test]
    fn custom_parsers_can_be_registered() {
        let mut compiler = RequirementCompiler::with_builtin_parsers();
        compiler.register(Arc::new(TagParser));
        assert_eq!(
            compiler.registered_types(),
            vec!["description", "location", "name", "tag"]
        );

        let filter = compiler.compile(&[json!({"type": "tag", "tag": "sensor*"})]);
        assert!(filter.matches(&doc(json!({"tags": ["SensorHub"]}))));

        let skipped = compiler.compile(&[json!({"type": "tag"})]);
        assert!(skipped.is_match_all());
    }

    #[test]
    fn registering_twice_replaces_parser() {
        let mut compiler = RequirementCompiler::new();
        compiler.register(Arc::new(TagParser));
        compiler.register(Arc::new(TagParser));
        assert_eq!(compiler.registered_types(), vec!["tag"]);
        assert!(compiler.parser("TAG").is_some());
    }
}
