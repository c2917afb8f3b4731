//! Query compilation.
//!
//! Requirements arrive as loosely typed JSON objects. The [`RequirementCompiler`]
//! dispatches each one to the parser registered for its type and folds the
//! resulting clauses into a single [`Filter`].

pub mod compiler;
pub mod filter;
pub mod geo;
pub mod parsers;

pub use compiler::{ParseOutcome, RequirementCompiler, RequirementParser, SkipReason};
pub use filter::{Clause, Filter, FilterBuilder, WildcardPattern};
pub use geo::{GeoPoint, GeoPolygon};
pub use parsers::{LocationParser, MatchOperator, StringMatchParser};
