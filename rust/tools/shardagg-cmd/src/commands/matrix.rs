//! Matrix command implementation

use std::{
    fs::File,
    io::{BufRead, BufReader},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use shardagg::{
    AdjacencyMatrixAggregation, AggregationSearch, FilterSet, ReductionEngine, SearchOutcome,
    ShardEvaluator, ShardId, ShardRequest,
    codec,
    collect::{AggregatorFactories, AggregatorFactory, MetricAggregatorFactory},
    config::{AdjacencyMatrixConfig, ReduceConfig},
    filter::Filter,
    render::{self, RenderOptions},
    search::DocStream,
};
use shardagg_common::error::Error;
use shardagg_workflow::cancel::CancellationToken;

use crate::utils::{print_json, validate_file_exists};

/// Name of the aggregation built by this command.
pub const AGGREGATION_NAME: &str = "matrix";

pub struct MatrixArgs {
    pub filters: Vec<String>,
    pub shards: Vec<String>,
    pub sum: Option<String>,
    pub separator: Option<String>,
    pub batch_reduce_size: Option<usize>,
    pub max_buckets: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub skip_empty: bool,
    pub output: Option<String>,
}

pub fn run(args: MatrixArgs) -> Result<()> {
    let skip_empty = args.skip_empty;
    let output = args.output.clone();
    let outcome = execute(&args)?;

    if let (Some(path), Some(result)) = (&output, &outcome.result) {
        let bytes = codec::encode_aggregations(result)?;
        std::fs::write(path, &bytes).with_context(|| format!("Failed to write {path}"))?;
        log::info!("wrote {} bytes to {path}", bytes.len());
    }
    print_json(&outcome_to_json(
        &outcome,
        &RenderOptions {
            skip_empty_buckets: skip_empty,
        },
    ))
}

/// Parsed `name=field[:value]` filter definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterArg {
    pub name: String,
    pub field: String,
    pub value: Option<String>,
}

impl FilterArg {
    pub fn parse(text: &str) -> Result<FilterArg> {
        let (name, condition) = text
            .split_once('=')
            .with_context(|| format!("Filter '{text}' must look like name=field[:value]"))?;
        let (field, value) = match condition.split_once(':') {
            Some((field, value)) => (field, Some(value.to_string())),
            None => (condition, None),
        };
        if field.is_empty() {
            anyhow::bail!("Filter '{text}' has no field");
        }
        Ok(FilterArg {
            name: name.to_string(),
            field: field.to_string(),
            value,
        })
    }

    /// Term filter when a value is given, exists filter otherwise.
    pub fn into_filter(self) -> Filter<Value> {
        let FilterArg { name, field, value } = self;
        Filter::from_fn(name, move |doc: &Value| match (doc.get(&field), &value) {
            (None | Some(Value::Null), _) => false,
            (Some(_), None) => true,
            (Some(found), Some(expected)) => term_matches(found, expected),
        })
    }
}

fn term_matches(found: &Value, expected: &str) -> bool {
    match found {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|item| term_matches(item, expected)),
        Value::Object(_) | Value::Null => false,
        other => other.to_string() == expected,
    }
}

fn build_search(args: &MatrixArgs) -> Result<AggregationSearch<Value>> {
    let mut matrix_config = AdjacencyMatrixConfig::default();
    if let Some(separator) = &args.separator {
        matrix_config.separator = separator.clone();
    }
    let filters = args
        .filters
        .iter()
        .map(|text| FilterArg::parse(text).map(FilterArg::into_filter))
        .collect::<Result<Vec<_>>>()?;
    let filters = FilterSet::with_config(filters, &matrix_config)?;

    let mut aggregation = AdjacencyMatrixAggregation::new(AGGREGATION_NAME, Arc::new(filters))?;
    if let Some(field) = &args.sum {
        let field = field.clone();
        let sum = MetricAggregatorFactory::sum(format!("sum_{field}"), move |doc: &Value| {
            doc.get(&field).and_then(Value::as_f64)
        });
        aggregation = aggregation.with_sub_aggregations(AggregatorFactories::new(vec![
            Arc::new(sum) as Arc<dyn AggregatorFactory<Value>>,
        ])?);
    }

    let mut reduce_config = ReduceConfig::default();
    if let Some(batch_reduce_size) = args.batch_reduce_size {
        reduce_config = reduce_config.with_batch_reduce_size(batch_reduce_size);
    }
    if let Some(max_buckets) = args.max_buckets {
        reduce_config = reduce_config.with_max_buckets(max_buckets);
    }

    let factories =
        AggregatorFactories::new(vec![Arc::new(aggregation) as Arc<dyn AggregatorFactory<Value>>])?;
    Ok(AggregationSearch::new(
        ShardEvaluator::new(factories, matrix_config.doc_batch_size)?,
        ReductionEngine::new(reduce_config)?,
    ))
}

fn execute(args: &MatrixArgs) -> Result<SearchOutcome> {
    let search = build_search(args)?;
    let shards = args
        .shards
        .iter()
        .enumerate()
        .map(|(i, path)| -> Result<ShardRequest<Value>> {
            Ok(ShardRequest::new(ShardId(i as u32), open_shard(path)?))
        })
        .collect::<Result<Vec<_>>>()?;
    let token = match args.timeout_secs {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };
    Ok(search.run(shards, &token)?)
}

/// Opens an ndjson file as a lazy document stream. Blank lines are skipped.
fn open_shard(path: &str) -> Result<DocStream<Value>> {
    validate_file_exists(path)?;
    let file = File::open(path).with_context(|| format!("Failed to open {path}"))?;
    let path = path.to_string();
    let docs = BufReader::new(file)
        .lines()
        .enumerate()
        .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
        .map(move |(i, line)| {
            let line = line.map_err(|e| Error::io(format!("{path}:{}", i + 1), e))?;
            serde_json::from_str::<Value>(&line)
                .map_err(|e| Error::evaluation(format!("{path}:{}", i + 1), e))
        });
    Ok(Box::new(docs))
}

fn outcome_to_json(outcome: &SearchOutcome, options: &RenderOptions) -> Value {
    let failures = outcome
        .failures
        .iter()
        .map(|failure| {
            json!({
                "shard": failure.shard_id.0,
                "reason": failure.error.to_string(),
            })
        })
        .collect::<Vec<_>>();
    json!({
        "_shards": {
            "total": outcome.total_shards,
            "successful": outcome.successful_shards(),
            "failed": outcome.failures.len(),
            "failures": failures,
        },
        "aggregations": outcome
            .result
            .as_ref()
            .map_or(Value::Null, |result| render::to_json_with(result, options)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardagg_testkit::files::write_ndjson_shards;

    fn args(filters: &[&str], shards: Vec<String>) -> MatrixArgs {
        MatrixArgs {
            filters: filters.iter().map(|f| f.to_string()).collect(),
            shards,
            sum: None,
            separator: None,
            batch_reduce_size: None,
            max_buckets: None,
            timeout_secs: None,
            skip_empty: false,
            output: None,
        }
    }

    fn paths(paths: Vec<std::path::PathBuf>) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_filter_arg() {
        assert_eq!(
            FilterArg::parse("red=color:red").unwrap(),
            FilterArg {
                name: "red".to_string(),
                field: "color".to_string(),
                value: Some("red".to_string()),
            }
        );
        assert_eq!(FilterArg::parse("tagged=tag").unwrap().value, None);
        assert!(FilterArg::parse("no_equals").is_err());
        assert!(FilterArg::parse("empty=").is_err());
    }

    #[test]
    fn test_term_and_exists_filters() {
        let term = FilterArg::parse("n=num:3").unwrap().into_filter();
        assert!(term.matches(&json!({"num": 3})).unwrap());
        assert!(term.matches(&json!({"num": [1, 3]})).unwrap());
        assert!(!term.matches(&json!({"num": "4"})).unwrap());

        let exists = FilterArg::parse("e=opt").unwrap().into_filter();
        assert!(exists.matches(&json!({"opt": false})).unwrap());
        assert!(!exists.matches(&json!({"opt": null})).unwrap());
        assert!(!exists.matches(&json!({})).unwrap());
    }

    #[test]
    fn test_matrix_over_shard_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_ndjson_shards(
            &dir,
            &[
                vec![json!({"a": true, "c": true, "value": 2.0}), json!({"b": true})],
                vec![json!({"a": true, "b": true, "value": 5.0})],
            ],
        )
        .unwrap();
        let mut args = args(&["a=a", "b=b", "c=c"], paths(files));
        args.sum = Some("value".to_string());
        let outcome = execute(&args).unwrap();
        assert!(outcome.is_complete());

        let result = outcome.result.unwrap();
        let matrix = result.matrix(AGGREGATION_NAME).unwrap();
        assert_eq!(matrix.doc_count("a"), 2);
        assert_eq!(matrix.doc_count("b"), 2);
        assert_eq!(matrix.doc_count("a&b"), 1);
        assert_eq!(matrix.doc_count("a&c"), 1);
        assert_eq!(matrix.doc_count("b&c"), 0);
        let sum = matrix.bucket("a").unwrap().aggregations().metric("sum_value");
        assert_eq!(sum.unwrap().value().as_f64(), Some(7.0));
    }

    #[test]
    fn test_malformed_shard_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_ndjson_shards(&dir, &[vec![json!({"a": true})]]).unwrap();
        let broken = dir.path().join("broken.ndjson");
        std::fs::write(&broken, "{\"a\": true}\n{not json\n").unwrap();

        let mut shards = paths(files);
        shards.push(broken.to_string_lossy().into_owned());
        let outcome = execute(&args(&["a=a"], shards)).unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].shard_id, ShardId(1));

        let rendered = outcome_to_json(&outcome, &RenderOptions::default());
        assert_eq!(rendered["_shards"]["failed"], 1);
        assert_eq!(rendered["_shards"]["successful"], 1);
    }

    #[test]
    fn test_output_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_ndjson_shards(&dir, &[vec![json!({"x": "1", "y": "1"})]]).unwrap();
        let output = dir.path().join("result.bin");
        let mut args = args(&["x=x:1", "y=y:1"], paths(files));
        args.separator = Some("+".to_string());
        args.output = Some(output.to_string_lossy().into_owned());
        run(args).unwrap();

        let decoded = codec::decode_aggregations(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(decoded.matrix(AGGREGATION_NAME).unwrap().doc_count("x+y"), 1);
    }

    #[test]
    fn test_missing_shard_file() {
        assert!(execute(&args(&["a=a"], vec!["/nonexistent.ndjson".to_string()])).is_err());
    }
}
