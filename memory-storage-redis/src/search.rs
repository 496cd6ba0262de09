//! RediSearch query construction and reply parsing.
//!
//! `FT.SEARCH` replies arrive as nested protocol values:
//! `[total, key, [field, value, …], key, …]`. The parsers here are
//! deliberately tolerant about integer-vs-bulk encodings but strict about
//! overall shape, so a protocol surprise becomes a typed error instead of
//! a silent empty result.

use std::collections::HashMap;

use redis::Value;

use wellness_memory_core::store::{KnnFilter, KnnHit, EMBEDDING_FIELD};
use wellness_memory_core::{Error, Result};

/// Field under which the KNN clause reports cosine distance.
const SCORE_FIELD: &str = "vector_score";

/// Escape a value for use inside a TAG clause.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            escaped.push(ch);
        } else {
            escaped.push('\\');
            escaped.push(ch);
        }
    }
    escaped
}

/// Build the query string for a KNN search, optionally tag-filtered.
#[must_use]
pub(crate) fn build_knn_query(k: usize, filter: Option<&KnnFilter>) -> String {
    let base = match filter {
        Some(filter) => format!("(@{}:{{{}}})", filter.field, escape_tag(&filter.equals)),
        None => "*".to_string(),
    };
    format!("{base}=>[KNN {k} @{EMBEDDING_FIELD} $vec AS {SCORE_FIELD}]")
}

fn value_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(text) => Some(text.as_bytes().to_vec()),
        Value::Int(number) => Some(number.to_string().into_bytes()),
        Value::Double(number) => Some(number.to_string().into_bytes()),
        _ => None,
    }
}

fn value_string(value: &Value) -> Option<String> {
    value_bytes(value).and_then(|bytes| String::from_utf8(bytes).ok())
}

fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(number) => u64::try_from(*number).ok(),
        other => value_string(other).and_then(|text| text.parse().ok()),
    }
}

fn shape_err(what: &str) -> Error {
    Error::BackendUnavailable {
        reason: format!("unexpected FT reply shape: {what}"),
    }
}

/// Parse an `FT.SEARCH` reply into hits.
///
/// The KNN clause reports cosine *distance*; hits carry cosine
/// *similarity* (`1 - distance`) to match the core contract.
pub(crate) fn parse_ft_search_reply(reply: &Value) -> Result<Vec<KnnHit>> {
    let Value::Array(items) = reply else {
        return Err(shape_err("top level is not an array"));
    };
    let Some((_total, rest)) = items.split_first() else {
        return Err(shape_err("empty reply"));
    };

    let mut hits = Vec::new();
    let mut cursor = rest.iter();
    while let Some(key_value) = cursor.next() {
        let key = value_string(key_value).ok_or_else(|| shape_err("document key"))?;
        let Some(Value::Array(pairs)) = cursor.next() else {
            return Err(shape_err("document fields"));
        };

        let mut fields: HashMap<String, Vec<u8>> = HashMap::new();
        let mut score = 0.0_f32;
        let mut pair_iter = pairs.iter();
        while let (Some(name_value), Some(field_value)) = (pair_iter.next(), pair_iter.next()) {
            let Some(name) = value_string(name_value) else {
                continue;
            };
            if name == SCORE_FIELD {
                let distance: f32 = value_string(field_value)
                    .and_then(|text| text.parse().ok())
                    .unwrap_or(1.0);
                score = 1.0 - distance;
            } else if name != EMBEDDING_FIELD {
                if let Some(bytes) = value_bytes(field_value) {
                    fields.insert(name, bytes);
                }
            }
        }

        hits.push(KnnHit { key, score, fields });
    }
    Ok(hits)
}

/// Pull `num_docs` out of an `FT.INFO` reply.
pub(crate) fn parse_ft_info_num_docs(reply: &Value) -> Result<u64> {
    match reply {
        Value::Array(items) => {
            let mut iter = items.iter();
            while let Some(name_value) = iter.next() {
                if value_string(name_value).as_deref() == Some("num_docs") {
                    return iter
                        .next()
                        .and_then(value_u64)
                        .ok_or_else(|| shape_err("num_docs value"));
                }
            }
            Err(shape_err("num_docs missing"))
        }
        Value::Map(pairs) => {
            for (name_value, field_value) in pairs {
                if value_string(name_value).as_deref() == Some("num_docs") {
                    return value_u64(field_value).ok_or_else(|| shape_err("num_docs value"));
                }
            }
            Err(shape_err("num_docs missing"))
        }
        _ => Err(shape_err("FT.INFO reply")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knn_query_without_filter() {
        assert_eq!(
            build_knn_query(3, None),
            "*=>[KNN 3 @embedding $vec AS vector_score]"
        );
    }

    #[test]
    fn test_knn_query_with_tag_filter() {
        let filter = KnnFilter::eq("user_id", "wellness_user");
        assert_eq!(
            build_knn_query(5, Some(&filter)),
            "(@user_id:{wellness_user})=>[KNN 5 @embedding $vec AS vector_score]"
        );
    }

    #[test]
    fn test_tag_escaping() {
        let filter = KnnFilter::eq("user_id", "user-1.a");
        let query = build_knn_query(1, Some(&filter));
        assert!(query.contains(r"user\-1\.a"));
    }

    #[test]
    fn test_parse_search_reply() {
        let reply = Value::Array(vec![
            Value::Int(1),
            Value::BulkString(b"episodic:u1:goal:1700000000".to_vec()),
            Value::Array(vec![
                Value::BulkString(b"vector_score".to_vec()),
                Value::BulkString(b"0.07".to_vec()),
                Value::BulkString(b"description".to_vec()),
                Value::BulkString(b"User's weight goal is 125 lbs".to_vec()),
            ]),
        ]);

        let hits = parse_ft_search_reply(&reply).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "episodic:u1:goal:1700000000");
        assert!((hits[0].score - 0.93).abs() < 1e-6);
        assert_eq!(
            hits[0].fields.get("description").map(Vec::as_slice),
            Some(b"User's weight goal is 125 lbs".as_slice())
        );
    }

    #[test]
    fn test_parse_search_reply_empty() {
        let reply = Value::Array(vec![Value::Int(0)]);
        assert!(parse_ft_search_reply(&reply).unwrap().is_empty());
    }

    #[test]
    fn test_parse_search_rejects_garbage() {
        assert!(parse_ft_search_reply(&Value::Int(3)).is_err());
    }

    #[test]
    fn test_parse_ft_info() {
        let reply = Value::Array(vec![
            Value::BulkString(b"index_name".to_vec()),
            Value::BulkString(b"episodic_idx".to_vec()),
            Value::BulkString(b"num_docs".to_vec()),
            Value::Int(42),
        ]);
        assert_eq!(parse_ft_info_num_docs(&reply).unwrap(), 42);
    }

    #[test]
    fn test_parse_ft_info_missing() {
        let reply = Value::Array(vec![Value::BulkString(b"index_name".to_vec())]);
        assert!(parse_ft_info_num_docs(&reply).is_err());
    }
}
