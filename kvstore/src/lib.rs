//! A bucketed key/value store: the default [`raft::StateMachine`] committed entries are
//! applied against.
//!
//! Commands are JSON arrays of strings, the command name first: `["SET", "bucket", "key",
//! "value"]`. Malformed or unknown commands are not fatal — they produce an ordinary result
//! string (`"BAD_ARGS"`, `"NO_CMD"`, ...) just like every other command, so a bad client
//! request never interrupts replication.

use raft::{StateMachine, StateMachineError};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// The outcome strings a command can produce in place of a real value.
pub mod outcome {
    pub const OK: &str = "OK";
    pub const NO_KEY: &str = "NO_KEY";
    pub const NO_BUCKET: &str = "NO_BUCKET";
    pub const NO_CMD: &str = "NO_CMD";
    pub const BAD_ARGS: &str = "BAD_ARGS";
}

/// A bucketed map of key/value pairs. Buckets spring into existence on first write and never
/// need to be declared up front.
#[derive(Debug, Default)]
pub struct KVStore {
    buckets: BTreeMap<String, BTreeMap<String, Value>>,
}

impl KVStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Value {
        self.buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set(&mut self, bucket: &str, key: &str, value: Value) -> &'static str {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value);
        outcome::OK
    }

    pub fn delete(&mut self, bucket: &str, key: &str) -> &'static str {
        match self.buckets.get_mut(bucket).and_then(|b| b.remove(key)) {
            Some(_) => outcome::OK,
            None => outcome::NO_KEY,
        }
    }

    pub fn delete_bucket(&mut self, bucket: &str) -> &'static str {
        match self.buckets.remove(bucket) {
            Some(_) => outcome::OK,
            None => outcome::NO_BUCKET,
        }
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn buckets(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }
}

fn as_str_args(item: &Value) -> Option<Vec<&str>> {
    item.as_array()?.iter().map(|v| v.as_str()).collect()
}

impl StateMachine for KVStore {
    fn apply(&mut self, item: &Value) -> Result<Value, StateMachineError> {
        let args = match as_str_args(item) {
            Some(args) if !args.is_empty() => args,
            _ => return Ok(Value::String(outcome::BAD_ARGS.to_string())),
        };

        let command = args[0].to_uppercase();
        let rest = &args[1..];
        debug!(command = %command, args = rest.len(), "applying kvstore command");

        let result = match command.as_str() {
            "GET" => match rest {
                [bucket, key] => self.get(bucket, key),
                _ => Value::String(outcome::BAD_ARGS.to_string()),
            },
            "SET" => match rest {
                [bucket, key, value] => {
                    Value::String(self.set(bucket, key, Value::String(value.to_string())).to_string())
                }
                _ => Value::String(outcome::BAD_ARGS.to_string()),
            },
            "DEL" => match rest {
                [bucket, key] => Value::String(self.delete(bucket, key).to_string()),
                _ => Value::String(outcome::BAD_ARGS.to_string()),
            },
            "DELBUCKET" => match rest {
                [bucket] => Value::String(self.delete_bucket(bucket).to_string()),
                _ => Value::String(outcome::BAD_ARGS.to_string()),
            },
            "KEYS" => match rest {
                [bucket] => Value::Array(self.keys(bucket).into_iter().map(Value::String).collect()),
                _ => Value::String(outcome::BAD_ARGS.to_string()),
            },
            "BUCKETS" => match rest {
                [] => Value::Array(self.buckets().into_iter().map(Value::String).collect()),
                _ => Value::String(outcome::BAD_ARGS.to_string()),
            },
            _ => Value::String(outcome::NO_CMD.to_string()),
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(store: &mut KVStore, item: Value) -> Value {
        store.apply(&item).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut store = KVStore::new();
        assert_eq!(apply(&mut store, json!(["SET", "b", "k", "v"])), json!("OK"));
        assert_eq!(apply(&mut store, json!(["GET", "b", "k"])), json!("v"));
    }

    #[test]
    fn get_missing_key_is_null() {
        let mut store = KVStore::new();
        assert_eq!(apply(&mut store, json!(["GET", "b", "missing"])), Value::Null);
    }

    #[test]
    fn delete_missing_key_reports_no_key() {
        let mut store = KVStore::new();
        assert_eq!(apply(&mut store, json!(["DEL", "b", "missing"])), json!("NO_KEY"));
    }

    #[test]
    fn delete_bucket_missing_reports_no_bucket() {
        let mut store = KVStore::new();
        assert_eq!(apply(&mut store, json!(["DELBUCKET", "ghost"])), json!("NO_BUCKET"));
    }

    #[test]
    fn keys_and_buckets_list_what_was_written() {
        let mut store = KVStore::new();
        apply(&mut store, json!(["SET", "b", "k1", "v1"]));
        apply(&mut store, json!(["SET", "b", "k2", "v2"]));
        apply(&mut store, json!(["SET", "other", "x", "y"]));

        assert_eq!(apply(&mut store, json!(["KEYS", "b"])), json!(["k1", "k2"]));
        assert_eq!(apply(&mut store, json!(["BUCKETS"])), json!(["b", "other"]));
    }

    #[test]
    fn unknown_command_reports_no_cmd() {
        let mut store = KVStore::new();
        assert_eq!(apply(&mut store, json!(["FROBNICATE"])), json!("NO_CMD"));
    }

    #[test]
    fn wrong_arity_reports_bad_args() {
        let mut store = KVStore::new();
        assert_eq!(apply(&mut store, json!(["SET", "b", "k"])), json!("BAD_ARGS"));
        assert_eq!(apply(&mut store, json!([])), json!("BAD_ARGS"));
    }

    #[test]
    fn delete_bucket_removes_all_its_keys() {
        let mut store = KVStore::new();
        apply(&mut store, json!(["SET", "b", "k", "v"]));
        assert_eq!(apply(&mut store, json!(["DELBUCKET", "b"])), json!("OK"));
        assert_eq!(apply(&mut store, json!(["GET", "b", "k"])), Value::Null);
    }
}
