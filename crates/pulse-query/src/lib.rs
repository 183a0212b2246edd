//! Query language over stored activity events.
//!
//! A script is a sequence of `name = expression;` assignments followed by
//! `RETURN expression;`. It is parsed once, checked for unknown function
//! names, then evaluated independently for each requested period:
//!
//! ```text
//! events = query_bucket("window");
//! events = merge_events_by_keys(events, ["app"]);
//! RETURN sort_by_duration(events);
//! ```

mod ast;
mod engine;
mod error;
mod functions;
mod interpreter;
mod parser;
mod value;

pub use ast::Script;
pub use engine::{
    DEFAULT_MAX_STEPS, Outcome, PeriodResult, QueryConfig, QueryEngine, QueryInput,
};
pub use error::{ErrorKind, Position, QueryError};
pub use functions::names as builtin_names;
pub use value::{Tag, Value};
