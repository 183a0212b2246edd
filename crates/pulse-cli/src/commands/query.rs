//! `pulse query`: evaluate a script over a batch of periods.

use std::io::Write;

use anyhow::Result;
use pulse_core::Period;
use pulse_query::{Outcome, QueryEngine, QueryInput};

/// Builds one input per period, each carrying every bucket alias.
pub fn inputs(periods: &[Period], aliases: &[(String, String)]) -> Vec<QueryInput> {
    periods
        .iter()
        .map(|period| {
            aliases
                .iter()
                .fold(QueryInput::new(*period), |input, (alias, id)| {
                    input.with_bucket(alias.as_str(), id.as_str())
                })
        })
        .collect()
}

/// Runs `script` and writes a JSON array with one outcome per period.
///
/// Errors that abort the whole batch (parse errors, unknown functions) are
/// returned instead of written.
pub fn run<W: Write>(
    writer: &mut W,
    engine: &QueryEngine,
    script: &str,
    inputs: &[QueryInput],
) -> Result<()> {
    let results = engine.execute(script, inputs)?;
    let outcomes: Vec<Outcome> = results.into_iter().map(Outcome::from).collect();
    writeln!(writer, "{}", serde_json::to_string_pretty(&outcomes)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use insta::assert_snapshot;
    use pulse_core::{Bucket, BucketId, Datastore, Event, MemoryDatastore};
    use pulse_query::{ErrorKind, QueryConfig, QueryError};
    use serde_json::{Map, json};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    fn engine() -> QueryEngine {
        let store = Arc::new(MemoryDatastore::new());
        store
            .create_bucket(&Bucket::new("window_laptop", "currentwindow", "t", "laptop", at(0)).unwrap())
            .unwrap();
        let mut data = Map::new();
        data.insert("app".to_string(), json!("vim"));
        store
            .insert_events(
                &BucketId::new("window_laptop").unwrap(),
                &[Event::from_parts(at(9), TimeDelta::minutes(90), data)],
            )
            .unwrap();
        QueryEngine::new(store, QueryConfig::default())
    }

    fn hours(ranges: &[(u32, u32)]) -> Vec<Period> {
        ranges
            .iter()
            .map(|&(s, e)| Period::new(at(s), at(e)).unwrap())
            .collect()
    }

    #[test]
    fn aliases_apply_to_every_period() {
        let aliases = [("window".to_string(), "window_laptop".to_string())];
        let inputs = inputs(&hours(&[(9, 10), (10, 11)]), &aliases);
        assert_eq!(inputs.len(), 2);
        assert!(inputs.iter().all(|i| i.buckets["window"] == "window_laptop"));
    }

    #[test]
    fn writes_one_outcome_per_period() {
        let aliases = [("window".to_string(), "window_laptop".to_string())];
        let script = r#"
            total = sum_durations(query_bucket("window"));
            RETURN 3600 / (total - 1800);
        "#;
        let mut out = Vec::new();
        run(&mut out, &engine(), script, &inputs(&hours(&[(9, 10), (10, 11)]), &aliases))
            .unwrap();

        assert_snapshot!(String::from_utf8(out).unwrap(), @r#"
        [
          {
            "ok": 2
          },
          {
            "error": {
              "kind": "ArithmeticError",
              "message": "division by zero",
              "position": {
                "line": 3,
                "column": 25
              }
            }
          }
        ]
        "#);
    }

    #[test]
    fn batch_errors_are_returned() {
        let mut out = Vec::new();
        let err = run(&mut out, &engine(), "RETURN nope();", &inputs(&hours(&[(9, 10)]), &[]))
            .unwrap_err();
        let err = err.downcast::<QueryError>().unwrap();
        assert_eq!(err.kind, ErrorKind::QueryNotFoundError);
        assert!(out.is_empty());
    }
}
