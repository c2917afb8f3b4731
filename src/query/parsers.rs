//! Built-in requirement parsers.

use serde_json::{Map, Value};

use super::compiler::{ParseOutcome, RequirementParser, SkipReason};
use super::filter::{Clause, FilterBuilder, WildcardPattern};
use super::geo::{number, GeoPoint, GeoPolygon};

/// Proximity tolerance for `at_location` requirements.
pub const AT_LOCATION_TOLERANCE_METERS: f64 = 20.0;

/// Field holding the free-text location.
pub const LOCATION_DESCRIPTION_FIELD: &str = "location.description";

/// Field holding the geo coordinates.
pub const LOCATION_COORDINATES_FIELD: &str = "location.coordinates";

/// Comparison operator of a string match.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    Equals,
    NotEquals,
    Contains,
    BeginsWith,
    EndsWith,
    /// Unrecognized operator; treated as an exact positive match.
    Unknown,
}

impl MatchOperator {
    /// Parses an operator name, ignoring case.
    #[must_use]
    pub fn parse(operator: &str) -> Self {
        match operator.to_lowercase().as_str() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "begins_with" => Self::BeginsWith,
            "ends_with" => Self::EndsWith,
            _ => Self::Unknown,
        }
    }

    /// Extends the match string with wildcards for this operator.
    #[must_use]
    pub fn wildcard(self, value: &str) -> String {
        match self {
            Self::Contains => format!("*{value}*"),
            Self::BeginsWith => format!("{value}*"),
            Self::EndsWith => format!("*{value}"),
            Self::Equals | Self::NotEquals | Self::Unknown => value.to_string(),
        }
    }
}

/// Adds a case-insensitive wildcard clause built from `match` and `operator`.
///
/// A missing `match` is treated as the empty string.
pub fn add_string_match(
    builder: &mut FilterBuilder,
    fields: &Map<String, Value>,
    field: &str,
) -> ParseOutcome {
    let value = fields.get("match").and_then(Value::as_str).unwrap_or_default();
    let operator = fields
        .get("operator")
        .and_then(Value::as_str)
        .map_or(MatchOperator::Unknown, MatchOperator::parse);

    let Some(pattern) = WildcardPattern::new(&operator.wildcard(value), true) else {
        return ParseOutcome::Skipped(SkipReason::InvalidValue(format!(
            "unusable match pattern '{value}'"
        )));
    };
    let clause = Clause::Wildcard {
        field: field.to_string(),
        pattern,
    };

    if operator == MatchOperator::NotEquals {
        builder.must_not(clause);
    } else {
        builder.filter(clause);
    }
    ParseOutcome::Applied
}

/// Parser for requirements that match a single string field.
#[derive(Debug, Clone)]
pub struct StringMatchParser {
    type_name: String,
    field: String,
}

impl StringMatchParser {
    /// Creates a parser for `type_name` that matches `field`.
    #[must_use]
    pub fn new(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field: field.into(),
        }
    }
}

impl RequirementParser for StringMatchParser {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn parse(&self, builder: &mut FilterBuilder, requirement: &Map<String, Value>) -> ParseOutcome {
        add_string_match(builder, requirement, &self.field)
    }
}

/// Parser for `location` requirements.
#[derive(Debug, Clone, Default)]
pub struct LocationParser;

impl LocationParser {
    /// Creates the parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn at_location(builder: &mut FilterBuilder, details: &Map<String, Value>) -> ParseOutcome {
        let center = match read_point(details) {
            Ok(center) => center,
            Err(reason) => return ParseOutcome::Skipped(reason),
        };
        builder.filter(Clause::GeoDistance {
            field: LOCATION_COORDINATES_FIELD.to_string(),
            center,
            radius_meters: AT_LOCATION_TOLERANCE_METERS,
        });
        ParseOutcome::Applied
    }

    fn in_area(builder: &mut FilterBuilder, details: &Map<String, Value>) -> ParseOutcome {
        let is_circle = ["lat", "lon", "radius"].iter().all(|k| details.contains_key(*k));

        let clause = if is_circle {
            let center = match read_point(details) {
                Ok(center) => center,
                Err(reason) => return ParseOutcome::Skipped(reason),
            };
            let radius = details.get("radius").and_then(number);
            let Some(radius_meters) = radius.filter(|r| r.is_finite() && *r >= 0.0) else {
                return ParseOutcome::Skipped(SkipReason::InvalidValue(
                    "radius must be a non-negative number".to_string(),
                ));
            };
            Clause::GeoDistance {
                field: LOCATION_COORDINATES_FIELD.to_string(),
                center,
                radius_meters,
            }
        } else if let Some(points) = details.get("polygon") {
            let Some(polygon) = read_polygon(points) else {
                return ParseOutcome::Skipped(SkipReason::InvalidValue(
                    "polygon needs at least three [lon, lat] vertices".to_string(),
                ));
            };
            Clause::GeoWithin {
                field: LOCATION_COORDINATES_FIELD.to_string(),
                polygon,
            }
        } else {
            return ParseOutcome::Skipped(SkipReason::MissingField("polygon"));
        };

        builder.filter(clause);
        ParseOutcome::Applied
    }
}

impl RequirementParser for LocationParser {
    fn type_name(&self) -> &str {
        "location"
    }

    fn parse(&self, builder: &mut FilterBuilder, requirement: &Map<String, Value>) -> ParseOutcome {
        let Some(operator) = requirement.get("operator").and_then(Value::as_str) else {
            return ParseOutcome::Skipped(SkipReason::MissingField("operator"));
        };
        let Some(details) = requirement.get("details").and_then(Value::as_object) else {
            return ParseOutcome::Skipped(SkipReason::MissingField("details"));
        };
        if details.is_empty() {
            return ParseOutcome::Skipped(SkipReason::MissingField("details"));
        }

        match operator.to_lowercase().as_str() {
            "described_by" => add_string_match(builder, details, LOCATION_DESCRIPTION_FIELD),
            "at_location" => Self::at_location(builder, details),
            "in_area" => Self::in_area(builder, details),
            other => ParseOutcome::Skipped(SkipReason::UnsupportedOperator(other.to_string())),
        }
    }
}

fn read_point(details: &Map<String, Value>) -> Result<GeoPoint, SkipReason> {
    let lat = details.get("lat").and_then(number).ok_or(SkipReason::MissingField("lat"))?;
    let lon = details.get("lon").and_then(number).ok_or(SkipReason::MissingField("lon"))?;
    GeoPoint::new(lat, lon)
        .ok_or_else(|| SkipReason::InvalidValue(format!("coordinates out of range: {lat}, {lon}")))
}

fn read_polygon(points: &Value) -> Option<GeoPolygon> {
    let vertices = points
        .as_array()?
        .iter()
        .map(|pair| match pair.as_array()?.as_slice() {
            [lon, lat] => GeoPoint::new(number(lat)?, number(lon)?),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    GeoPolygon::new(vertices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DeviceDescription;
    use crate::query::filter::Filter;
    use serde_json::json;

    fn parse(parser: &dyn RequirementParser, requirement: Value) -> (ParseOutcome, Filter) {
        let mut builder = FilterBuilder::new();
        let outcome = parser.parse(&mut builder, requirement.as_object().unwrap());
        (outcome, builder.build())
    }

    fn located(lat: f64, lon: f64) -> DeviceDescription {
        DeviceDescription::from_value(json!({
            "location": {"description": "Lab 3", "coordinates": {"lat": lat, "lon": lon}}
        }))
        .unwrap()
    }

    #[test]
    fn operators_extend_match_with_wildcards() {
        assert_eq!(MatchOperator::parse("CONTAINS").wildcard("x"), "*x*");
        assert_eq!(MatchOperator::parse("begins_with").wildcard("x"), "x*");
        assert_eq!(MatchOperator::parse("ends_with").wildcard("x"), "*x");
        assert_eq!(MatchOperator::parse("equals").wildcard("x"), "x");
        assert_eq!(MatchOperator::parse("not_equals").wildcard("x"), "x");
        assert_eq!(MatchOperator::parse("similar_to"), MatchOperator::Unknown);
        assert_eq!(MatchOperator::Unknown.wildcard("x"), "x");
    }

    #[test]
    fn name_parser_targets_name_field() {
        let parser = StringMatchParser::new("name", "name");
        let (outcome, filter) = parse(&parser, json!({"type": "name", "match": "smart", "operator": "begins_with"}));
        assert!(outcome.is_applied());
        assert_eq!(filter.must()[0].field(), "name");

        let lamp = DeviceDescription::from_value(json!({"name": "SmartLamp"})).unwrap();
        let other = DeviceDescription::from_value(json!({"name": "MySmartLamp"})).unwrap();
        assert!(filter.matches(&lamp));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn not_equals_negates_and_unknown_operator_matches_exactly() {
        let parser = StringMatchParser::new("description", "description");

        let (_, negated) = parse(&parser, json!({"match": "Heater", "operator": "not_equals"}));
        assert!(negated.must().is_empty());
        assert_eq!(negated.must_not().len(), 1);

        let (_, exact) = parse(&parser, json!({"match": "Heater", "operator": "resembles"}));
        assert_eq!(exact.must().len(), 1);
        let heater = DeviceDescription::from_value(json!({"description": "heater"})).unwrap();
        let heaters = DeviceDescription::from_value(json!({"description": "heaters"})).unwrap();
        assert!(exact.matches(&heater));
        assert!(!exact.matches(&heaters));
    }

    #[test]
    fn location_described_by_uses_location_description() {
        let (outcome, filter) = parse(
            &LocationParser::new(),
            json!({"type": "location", "operator": "described_by",
                   "details": {"match": "lab", "operator": "contains"}}),
        );
        assert!(outcome.is_applied());
        assert_eq!(filter.must()[0].field(), LOCATION_DESCRIPTION_FIELD);
        assert!(filter.matches(&located(0.0, 0.0)));
    }

    #[test]
    fn location_at_location_uses_twenty_meter_radius() {
        let (outcome, filter) = parse(
            &LocationParser::new(),
            json!({"operator": "at_location", "details": {"lat": 48.0, "lon": 9.0}}),
        );
        assert!(outcome.is_applied());
        assert!(filter.matches(&located(48.0001, 9.0)));
        assert!(!filter.matches(&located(48.001, 9.0)));
    }

    #[test]
    fn location_in_area_circle_and_polygon() {
        let parser = LocationParser::new();
        let (_, circle) = parse(
            &parser,
            json!({"operator": "in_area", "details": {"lat": 48.0, "lon": 9.0, "radius": 1000}}),
        );
        assert!(circle.matches(&located(48.005, 9.0)));
        assert!(!circle.matches(&located(48.05, 9.0)));

        let (outcome, polygon) = parse(
            &parser,
            json!({"operator": "in_area", "details": {"polygon": [[9.0, 48.0], [10.0, 48.0], [10.0, 49.0], [9.0, 49.0]]}}),
        );
        assert!(outcome.is_applied());
        assert!(polygon.matches(&located(48.5, 9.5)));
        assert!(!polygon.matches(&located(47.5, 9.5)));
    }

    #[test]
    fn malformed_location_details_are_skipped() {
        let parser = LocationParser::new();
        let cases = [
            json!({"operator": "at_location"}),
            json!({"operator": "at_location", "details": {}}),
            json!({"operator": "at_location", "details": {"lat": "north", "lon": 9.0}}),
            json!({"operator": "at_location", "details": {"lat": 123.0, "lon": 9.0}}),
            json!({"operator": "in_area", "details": {"polygon": [[9.0, 48.0], [10.0, 48.0]]}}),
            json!({"operator": "in_area", "details": {"polygon": [[9.0], [10.0, 48.0], [1.0, 1.0]]}}),
            json!({"operator": "in_area", "details": {"lat": 1.0, "lon": 1.0, "radius": -5}}),
            json!({"operator": "in_area", "details": {"lat": 1.0}}),
            json!({"operator": "near", "details": {"lat": 1.0, "lon": 1.0}}),
            json!({"details": {"lat": 1.0, "lon": 1.0}}),
        ];

        for case in cases {
            let (outcome, filter) = parse(&parser, case.clone());
            assert!(!outcome.is_applied(), "expected skip for {case}");
            assert!(filter.is_match_all(), "expected no clause for {case}");
        }
    }
}
