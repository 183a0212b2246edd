//! Built-in function table.
//!
//! Every callable name in the language is a row in [`BUILTINS`]. Argument
//! tags are checked against the row's parameter list before the function
//! body runs, so bodies can assume well-typed arguments.

use std::collections::BTreeMap;
use std::fmt;

use chrono::TimeDelta;
use pulse_core::transform::{self, Category, Rule};
use pulse_core::{
    BucketId, Datastore, Event, Period, TransformError, ValidationError, delta_to_secs,
    secs_to_delta,
};
use regex::Regex;
use serde_json::Value as Json;

use crate::error::QueryError;
use crate::value::{Tag, Value};

/// Pulsetime `flood` uses when none is given, in seconds.
const DEFAULT_FLOOD_PULSETIME: f64 = 5.0;

/// What a single evaluation can see: the store, its period and bucket aliases.
pub(crate) struct Context<'a> {
    pub store: &'a dyn Datastore,
    pub period: Period,
    pub buckets: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
enum Accepts {
    Tag(Tag),
    Any,
    /// `List` or `EventList`.
    Sequence,
}

impl Accepts {
    fn matches(self, tag: Tag) -> bool {
        match self {
            Self::Tag(expected) => expected == tag,
            Self::Any => true,
            Self::Sequence => matches!(tag, Tag::List | Tag::EventList),
        }
    }
}

impl fmt::Display for Accepts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => tag.fmt(f),
            Self::Any => f.write_str("any value"),
            Self::Sequence => f.write_str("List or EventList"),
        }
    }
}

#[derive(Debug)]
struct Param {
    name: &'static str,
    accepts: Accepts,
    optional: bool,
}

const fn required(name: &'static str, accepts: Accepts) -> Param {
    Param {
        name,
        accepts,
        optional: false,
    }
}

const fn optional(name: &'static str, accepts: Accepts) -> Param {
    Param {
        name,
        accepts,
        optional: true,
    }
}

const EVENTS: Accepts = Accepts::Tag(Tag::EventList);
const NUMBER: Accepts = Accepts::Tag(Tag::Number);
const STRING: Accepts = Accepts::Tag(Tag::String);
const BOOL: Accepts = Accepts::Tag(Tag::Bool);
const LIST: Accepts = Accepts::Tag(Tag::List);
const OBJECT: Accepts = Accepts::Tag(Tag::Object);

type Body = fn(&Context<'_>, &mut Args) -> Result<Value, QueryError>;

/// A callable built-in.
pub struct Builtin {
    pub name: &'static str,
    params: &'static [Param],
    /// The last parameter repeats.
    variadic: bool,
    body: Body,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .finish_non_exhaustive()
    }
}

const fn builtin(name: &'static str, params: &'static [Param], body: Body) -> Builtin {
    Builtin {
        name,
        params,
        variadic: false,
        body,
    }
}

static BUILTINS: &[Builtin] = &[
    builtin("query_bucket", &[required("bucket", STRING)], query_bucket),
    builtin("query_bucket_names", &[], query_bucket_names),
    builtin(
        "find_bucket",
        &[required("prefix", STRING), optional("hostname", STRING)],
        find_bucket,
    ),
    builtin(
        "filter_period_intersect",
        &[required("events", EVENTS), required("filter", EVENTS)],
        filter_period_intersect,
    ),
    builtin(
        "period_union",
        &[required("events1", EVENTS), required("events2", EVENTS)],
        period_union,
    ),
    builtin(
        "union",
        &[required("events1", EVENTS), required("events2", EVENTS)],
        union,
    ),
    builtin(
        "union_no_overlap",
        &[required("events1", EVENTS), required("events2", EVENTS)],
        union_no_overlap,
    ),
    builtin(
        "merge_events_by_keys",
        &[required("events", EVENTS), required("keys", LIST)],
        merge_events_by_keys,
    ),
    builtin(
        "chunk_events_by_key",
        &[required("events", EVENTS), required("key", STRING)],
        chunk_events_by_key,
    ),
    builtin(
        "chunk",
        &[required("events", EVENTS), required("keys", LIST)],
        chunk,
    ),
    builtin("merge_events", &[required("events", EVENTS)], merge_events),
    builtin("split_url_events", &[required("events", EVENTS)], split_url_events),
    builtin(
        "simplify_string",
        &[required("events", EVENTS), optional("key", STRING)],
        simplify_string,
    ),
    builtin(
        "flood",
        &[required("events", EVENTS), optional("pulsetime", NUMBER)],
        flood,
    ),
    builtin("sort_by_timestamp", &[required("events", EVENTS)], sort_by_timestamp),
    builtin("sort_by_duration", &[required("events", EVENTS)], sort_by_duration),
    builtin(
        "limit_events",
        &[required("events", EVENTS), required("count", NUMBER)],
        limit_events,
    ),
    builtin("sum_durations", &[required("events", EVENTS)], sum_durations),
    Builtin {
        name: "concat",
        params: &[required("lists", Accepts::Sequence)],
        variadic: true,
        body: concat,
    },
    builtin(
        "categorize",
        &[required("events", EVENTS), required("rules", LIST)],
        categorize,
    ),
    builtin(
        "tag",
        &[required("events", EVENTS), required("rules", LIST)],
        tag,
    ),
    builtin(
        "filter_keyvals",
        &[
            required("events", EVENTS),
            required("key", STRING),
            required("values", LIST),
            optional("exclude", BOOL),
        ],
        filter_keyvals,
    ),
    builtin(
        "filter_keyvals_regex",
        &[
            required("events", EVENTS),
            required("key", STRING),
            required("regex", STRING),
        ],
        filter_keyvals_regex,
    ),
    builtin(
        "heartbeat_reduce",
        &[required("events", EVENTS), required("pulsetime", NUMBER)],
        heartbeat_reduce,
    ),
    builtin(
        "get",
        &[
            required("object", OBJECT),
            required("key", STRING),
            optional("default", Accepts::Any),
        ],
        get,
    ),
    builtin("len", &[required("value", Accepts::Any)], len),
    builtin("nop", &[], nop),
];

/// Looks up a built-in by name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Names of every built-in, in table order.
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|b| b.name)
}

impl Builtin {
    pub(crate) fn invoke(&self, ctx: &Context<'_>, args: Vec<Value>) -> Result<Value, QueryError> {
        self.check(&args)?;
        let mut args = Args {
            function: self.name,
            values: args.into_iter().map(Some).collect(),
        };
        (self.body)(ctx, &mut args)
    }

    fn check(&self, args: &[Value]) -> Result<(), QueryError> {
        let min = self.params.iter().filter(|p| !p.optional).count();
        let max = if self.variadic {
            usize::MAX
        } else {
            self.params.len()
        };
        if args.len() < min || args.len() > max {
            let expected = match (self.variadic, min == max) {
                (true, _) => format!("at least {min} arguments"),
                (false, true) => format!("{min} arguments"),
                (false, false) => format!("{min} to {max} arguments"),
            };
            return Err(QueryError::type_mismatch(
                &format!("{}()", self.name),
                expected,
                args.len(),
            ));
        }

        for (i, arg) in args.iter().enumerate() {
            let Some(param) = self.params.get(i).or_else(|| self.params.last()) else {
                break;
            };
            if !param.accepts.matches(arg.tag()) {
                return Err(QueryError::type_mismatch(
                    &format!("{}() argument '{}'", self.name, param.name),
                    param.accepts,
                    arg.tag(),
                ));
            }
        }
        Ok(())
    }
}

/// Positional arguments, each taken at most once.
pub(crate) struct Args {
    function: &'static str,
    values: Vec<Option<Value>>,
}

impl Args {
    fn take(&mut self, index: usize) -> Option<Value> {
        self.values.get_mut(index).and_then(Option::take)
    }

    fn mismatch(&self, expected: Tag, found: Option<&Value>) -> QueryError {
        QueryError::type_mismatch(
            &format!("{}()", self.function),
            expected,
            found.map_or_else(|| "nothing".to_string(), |v| v.tag().to_string()),
        )
    }

    fn events(&mut self, index: usize) -> Result<Vec<Event>, QueryError> {
        match self.take(index) {
            Some(Value::EventList(events)) => Ok(events),
            other => Err(self.mismatch(Tag::EventList, other.as_ref())),
        }
    }

    fn string(&mut self, index: usize) -> Result<String, QueryError> {
        self.opt_string(index)?
            .ok_or_else(|| self.mismatch(Tag::String, None))
    }

    fn opt_string(&mut self, index: usize) -> Result<Option<String>, QueryError> {
        match self.take(index) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.mismatch(Tag::String, Some(&other))),
        }
    }

    fn number(&mut self, index: usize) -> Result<f64, QueryError> {
        self.opt_number(index)?
            .ok_or_else(|| self.mismatch(Tag::Number, None))
    }

    fn opt_number(&mut self, index: usize) -> Result<Option<f64>, QueryError> {
        match self.take(index) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(n)),
            Some(other) => Err(self.mismatch(Tag::Number, Some(&other))),
        }
    }

    fn opt_bool(&mut self, index: usize) -> Result<Option<bool>, QueryError> {
        match self.take(index) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(self.mismatch(Tag::Bool, Some(&other))),
        }
    }

    fn list(&mut self, index: usize) -> Result<Vec<Value>, QueryError> {
        match self.take(index) {
            Some(Value::List(items)) => Ok(items),
            other => Err(self.mismatch(Tag::List, other.as_ref())),
        }
    }

    fn object(&mut self, index: usize) -> Result<BTreeMap<String, Value>, QueryError> {
        match self.take(index) {
            Some(Value::Object(fields)) => Ok(fields),
            other => Err(self.mismatch(Tag::Object, other.as_ref())),
        }
    }

    fn rest(&mut self, from: usize) -> Vec<Value> {
        self.values
            .iter_mut()
            .skip(from)
            .filter_map(Option::take)
            .collect()
    }

    /// A list argument whose items must all be strings.
    fn strings(&mut self, index: usize) -> Result<Vec<String>, QueryError> {
        let function = self.function;
        self.list(index)?
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(QueryError::type_mismatch(
                    &format!("{function}() list item"),
                    Tag::String,
                    other.tag(),
                )),
            })
            .collect()
    }
}

/// Converts a seconds argument into a span, rejecting negatives.
fn span(field: &'static str, secs: f64) -> Result<TimeDelta, QueryError> {
    secs_to_delta(secs).map_err(|err| match err {
        ValidationError::NegativeDuration { .. } => TransformError::NegativeSpan { field }.into(),
        _ => QueryError::value(format!("{field} must be finite")),
    })
}

fn query_bucket(ctx: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let name = args.string(0)?;
    let id = ctx.buckets.get(&name).cloned().unwrap_or(name);
    let bucket = BucketId::new(id)?;
    let mut events = ctx.store.get_events(
        &bucket,
        Some(ctx.period.start()),
        Some(ctx.period.end()),
        None,
    )?;
    tracing::debug!(bucket = %bucket, count = events.len(), "queried bucket");
    // The store returns newest first; stable sort keeps id order for ties.
    events.reverse();
    Ok(transform::sort_by_timestamp(events).into())
}

fn query_bucket_names(ctx: &Context<'_>, _args: &mut Args) -> Result<Value, QueryError> {
    let buckets = ctx.store.buckets()?;
    Ok(Value::List(
        buckets
            .into_iter()
            .map(|b| Value::String(b.id.as_str().to_string()))
            .collect(),
    ))
}

fn find_bucket(ctx: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let prefix = args.string(0)?;
    let hostname = args.opt_string(1)?;
    ctx.store
        .buckets()?
        .into_iter()
        .find(|b| {
            b.id.as_str().starts_with(&prefix)
                && hostname.as_ref().is_none_or(|h| *h == b.hostname)
        })
        .map(|b| Value::String(b.id.as_str().to_string()))
        .ok_or_else(|| match hostname {
            Some(h) => QueryError::value(format!(
                "no bucket matches prefix {prefix:?} on host {h:?}"
            )),
            None => QueryError::value(format!("no bucket matches prefix {prefix:?}")),
        })
}

fn filter_period_intersect(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let filter = args.events(1)?;
    Ok(transform::filter_period_intersect_events(&events, &filter).into())
}

fn period_union(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let a = args.events(0)?;
    let b = args.events(1)?;
    Ok(transform::period_union_events(&a, &b).into())
}

fn union(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let a = args.events(0)?;
    let b = args.events(1)?;
    Ok(transform::union(&a, &b).into())
}

fn union_no_overlap(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let a = args.events(0)?;
    let b = args.events(1)?;
    Ok(transform::union_no_overlap(&a, &b).into())
}

fn merge_events_by_keys(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let keys = args.strings(1)?;
    Ok(transform::merge_events_by_keys(&events, &keys).into())
}

fn chunk_events_by_key(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let key = args.string(1)?;
    Ok(transform::chunk_events_by_key(&events, &key).into())
}

fn chunk(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let keys = args.strings(1)?;
    let tree = transform::chunk(&events, &keys);
    Value::from_json(tree.to_json(tree.root()))
}

fn flood(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let pulsetime = args.opt_number(1)?.unwrap_or(DEFAULT_FLOOD_PULSETIME);
    Ok(transform::flood(events, span("pulsetime", pulsetime)?).into())
}

fn merge_events(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    Ok(transform::merge_events(args.events(0)?).into())
}

fn split_url_events(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    Ok(transform::split_url_events(args.events(0)?).into())
}

fn simplify_string(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let key = args.opt_string(1)?.unwrap_or_else(|| "title".to_string());
    Ok(transform::simplify_string(events, &key).into())
}

fn sort_by_timestamp(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    Ok(transform::sort_by_timestamp(args.events(0)?).into())
}

fn sort_by_duration(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    Ok(transform::sort_by_duration(args.events(0)?).into())
}

fn limit_events(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let count = args.number(1)?;
    if count.fract() != 0.0 || !count.is_finite() {
        return Err(QueryError::value(format!(
            "limit_events() count must be a whole number, got {count}"
        )));
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "count is whole; float to int casts saturate"
    )]
    let count = count as i64;
    Ok(transform::limit_events(events, count)?.into())
}

fn sum_durations(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    Ok(Value::Number(delta_to_secs(transform::sum_durations(&events))))
}

fn concat(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let lists = args.rest(0);
    let first_tag = lists.first().map_or(Tag::EventList, Value::tag);
    if let Some(odd) = lists.iter().find(|l| l.tag() != first_tag) {
        return Err(QueryError::type_mismatch(
            "concat() arguments",
            first_tag,
            odd.tag(),
        ));
    }
    Ok(if first_tag == Tag::List {
        Value::List(
            lists
                .into_iter()
                .flat_map(|l| match l {
                    Value::List(items) => items,
                    _ => Vec::new(),
                })
                .collect(),
        )
    } else {
        Value::EventList(transform::concat(lists.into_iter().map(|l| match l {
            Value::EventList(events) => events,
            _ => Vec::new(),
        })))
    })
}

/// Splits a `[label, rule]` pair from a rules list.
fn rule_pair(function: &str, item: Value) -> Result<(Value, Rule), QueryError> {
    let Value::List(pair) = item else {
        return Err(QueryError::type_mismatch(
            &format!("{function}() rule"),
            "[label, rule] List",
            item.tag(),
        ));
    };
    let [label, rule]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
        QueryError::value(format!(
            "{function}() rule must have 2 items, got {}",
            pair.len()
        ))
    })?;
    let rule = Rule::from_json(&rule.to_json())?;
    Ok((label, rule))
}

fn categorize(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let rules = args
        .list(1)?
        .into_iter()
        .map(|item| {
            let (label, rule) = rule_pair("categorize", item)?;
            let category: Category = match label {
                Value::String(name) => vec![name],
                Value::List(parts) => parts
                    .into_iter()
                    .map(|part| match part {
                        Value::String(s) => Ok(s),
                        other => Err(QueryError::type_mismatch(
                            "categorize() category part",
                            Tag::String,
                            other.tag(),
                        )),
                    })
                    .collect::<Result<_, _>>()?,
                other => {
                    return Err(QueryError::type_mismatch(
                        "categorize() category",
                        "String or List",
                        other.tag(),
                    ));
                }
            };
            Ok((category, rule))
        })
        .collect::<Result<Vec<_>, QueryError>>()?;
    Ok(transform::categorize(events, &rules).into())
}

fn tag(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let rules = args
        .list(1)?
        .into_iter()
        .map(|item| match rule_pair("tag", item)? {
            (Value::String(label), rule) => Ok((label, rule)),
            (other, _) => Err(QueryError::type_mismatch("tag() label", Tag::String, other.tag())),
        })
        .collect::<Result<Vec<_>, QueryError>>()?;
    Ok(transform::tag(events, &rules).into())
}

fn filter_keyvals(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let key = args.string(1)?;
    let values: Vec<Json> = args.list(2)?.iter().map(Value::to_json).collect();
    let exclude = args.opt_bool(3)?.unwrap_or(false);
    Ok(transform::filter_keyvals(events, &key, &values, exclude).into())
}

fn filter_keyvals_regex(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let key = args.string(1)?;
    let pattern = args.string(2)?;
    let regex = Regex::new(&pattern).map_err(|e| TransformError::InvalidRegex {
        pattern: pattern.clone(),
        message: e.to_string(),
    })?;
    Ok(transform::filter_keyvals_regex(events, &key, &regex).into())
}

fn heartbeat_reduce(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let events = args.events(0)?;
    let pulsetime = span("pulsetime", args.number(1)?)?;
    Ok(transform::heartbeat_reduce(events, pulsetime).into())
}

fn get(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let mut object = args.object(0)?;
    let key = args.string(1)?;
    let default = args.take(2);
    object
        .remove(&key)
        .or(default)
        .ok_or_else(|| QueryError::value(format!("key {key:?} not found")))
}

fn len(_: &Context<'_>, args: &mut Args) -> Result<Value, QueryError> {
    let length = match args.take(0) {
        Some(Value::List(items)) => items.len(),
        Some(Value::EventList(events)) => events.len(),
        Some(Value::Object(fields)) => fields.len(),
        Some(Value::String(s)) => s.chars().count(),
        other => {
            return Err(QueryError::type_mismatch(
                "len() argument 'value'",
                "List, EventList, Object or String",
                other.map_or(Tag::List, |v| v.tag()),
            ));
        }
    };
    #[expect(clippy::cast_precision_loss, reason = "lengths stay far below 2^52")]
    let length = length as f64;
    Ok(Value::Number(length))
}

fn nop(_: &Context<'_>, _args: &mut Args) -> Result<Value, QueryError> {
    Ok(Value::List(Vec::new()))
}
