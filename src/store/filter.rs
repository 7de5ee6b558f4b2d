// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Minimal query-filter evaluation for [`MemoryStore`](super::MemoryStore).
//!
//! Supports the subset of the MongoDB filter language the engine produces
//! plus a few operators tests find handy: implicit equality, `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$exists`, `$or` and `$and`.
//! Comparisons follow type bracketing: values of different BSON types never
//! compare, except numbers, which compare across integer and double types.

use bson::{Bson, Document};
use std::cmp::Ordering;

/// Check whether `doc` satisfies `filter`.
///
/// Unknown operators never match.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$or" => sub_filters(condition).map_or(false, |subs| subs.iter().any(|f| matches_filter(doc, f))),
        "$and" => sub_filters(condition).map_or(false, |subs| subs.iter().all(|f| matches_filter(doc, f))),
        _ => matches_field(lookup(doc, key), condition),
    })
}

/// Compare two BSON values, `None` when they are not comparable.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => Some((x.time, x.increment).cmp(&(y.time, y.increment))),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

fn sub_filters(condition: &Bson) -> Option<Vec<&Document>> {
    match condition {
        Bson::Array(items) => items.iter().map(|item| item.as_document()).collect(),
        _ => None,
    }
}

/// Resolve a possibly dotted path ("address.city") inside a document.
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> bool {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => {
            ops.iter().all(|(op, operand)| apply_operator(value, op, operand))
        }
        _ => value.map_or(matches!(condition, Bson::Null), |v| values_equal(v, condition)),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().map_or(false, |k| k.starts_with('$'))
}

fn apply_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> bool {
    match op {
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            value.is_some() == wanted
        }
        "$eq" => value.map_or(matches!(operand, Bson::Null), |v| values_equal(v, operand)),
        "$ne" => !value.map_or(matches!(operand, Bson::Null), |v| values_equal(v, operand)),
        "$in" => match operand {
            Bson::Array(candidates) => value.map_or(false, |v| candidates.iter().any(|c| values_equal(v, c))),
            _ => false,
        },
        "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
        "$gte" => ordered(value, operand, |o| o != Ordering::Less),
        "$lt" => ordered(value, operand, |o| o == Ordering::Less),
        "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
        _ => false,
    }
}

fn ordered(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|v| compare_values(v, operand))
        .map_or(false, accept)
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ts(millis: i64) -> bson::DateTime {
        bson::DateTime::from_millis(millis)
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(matches_filter(&doc! { "a": 1 }, &doc! {}));
        assert!(matches_filter(&doc! {}, &doc! {}));
    }

    #[test]
    fn test_implicit_equality() {
        let d = doc! { "status": "active", "n": 3 };
        assert!(matches_filter(&d, &doc! { "status": "active" }));
        assert!(!matches_filter(&d, &doc! { "status": "closed" }));
        // int32 vs int64 compare by value
        assert!(matches_filter(&d, &doc! { "n": 3_i64 }));
    }

    #[test]
    fn test_gte_on_datetimes() {
        let filter = doc! { "updatedAt": { "$gte": ts(1_000) } };
        assert!(matches_filter(&doc! { "updatedAt": ts(1_000) }, &filter));
        assert!(matches_filter(&doc! { "updatedAt": ts(2_000) }, &filter));
        assert!(!matches_filter(&doc! { "updatedAt": ts(999) }, &filter));
    }

    #[test]
    fn test_missing_field_never_matches_gte() {
        let filter = doc! { "updatedAt": { "$gte": ts(0) } };
        assert!(!matches_filter(&doc! { "other": 1 }, &filter));
    }

    #[test]
    fn test_type_bracketing() {
        // A string never compares against a date
        let filter = doc! { "updatedAt": { "$gte": ts(0) } };
        assert!(!matches_filter(&doc! { "updatedAt": "2026-01-01" }, &filter));
    }

    #[test]
    fn test_exists() {
        let d = doc! { "a": 1 };
        assert!(matches_filter(&d, &doc! { "a": { "$exists": true } }));
        assert!(matches_filter(&d, &doc! { "b": { "$exists": false } }));
        assert!(!matches_filter(&d, &doc! { "b": { "$exists": true } }));
    }

    #[test]
    fn test_or() {
        let filter = doc! { "$or": [ { "ts": { "$gte": 10 } }, { "ts": { "$exists": false } } ] };
        assert!(matches_filter(&doc! { "ts": 11 }, &filter));
        assert!(matches_filter(&doc! { "x": 1 }, &filter));
        assert!(!matches_filter(&doc! { "ts": 9 }, &filter));
    }

    #[test]
    fn test_and_and_range() {
        let filter = doc! { "$and": [ { "n": { "$gt": 1 } }, { "n": { "$lte": 3 } } ] };
        assert!(!matches_filter(&doc! { "n": 1 }, &filter));
        assert!(matches_filter(&doc! { "n": 2.5 }, &filter));
        assert!(matches_filter(&doc! { "n": 3 }, &filter));
        assert!(!matches_filter(&doc! { "n": 4 }, &filter));
    }

    #[test]
    fn test_in_and_ne() {
        let d = doc! { "tier": "gold" };
        assert!(matches_filter(&d, &doc! { "tier": { "$in": ["gold", "silver"] } }));
        assert!(!matches_filter(&d, &doc! { "tier": { "$in": ["bronze"] } }));
        assert!(matches_filter(&d, &doc! { "tier": { "$ne": "bronze" } }));
    }

    #[test]
    fn test_dotted_path() {
        let d = doc! { "address": { "city": "Leeds" } };
        assert!(matches_filter(&d, &doc! { "address.city": "Leeds" }));
        assert!(!matches_filter(&d, &doc! { "address.zip": { "$exists": true } }));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        assert!(!matches_filter(&doc! { "a": 1 }, &doc! { "a": { "$regex": "1" } }));
    }

    #[test]
    fn test_compare_values_numbers() {
        assert_eq!(compare_values(&Bson::Int32(2), &Bson::Double(2.0)), Some(Ordering::Equal));
        assert_eq!(compare_values(&Bson::Int64(1), &Bson::Int32(2)), Some(Ordering::Less));
        assert_eq!(compare_values(&Bson::Int32(1), &Bson::String("1".into())), None);
    }
}
