// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query predicate construction.
//!
//! The same predicate drives the count, the schema probe sample, the live
//! cursor and the export cursor, so every path sees the same document set.
//!
//! | Job | Predicate |
//! |-----|-----------|
//! | full copy | `{}` |
//! | incremental, no `since` | `{}` |
//! | incremental, exclude missing | `{f: {$gte: since}}` |
//! | incremental, include missing | `{$or: [{f: {$gte: since}}, {f: {$exists: false}}]}` |

use crate::config::{IncrementalConfig, MissingTimestampPolicy};
use bson::{doc, Bson, Document};

/// Build the filter a collection is read with.
///
/// The timestamp field is not checked for existence on the source.
pub fn build_predicate(incremental: Option<&IncrementalConfig>) -> Document {
    let Some(incremental) = incremental else {
        return Document::new();
    };
    let Some(since) = incremental.since else {
        return Document::new();
    };

    let field = incremental.timestamp_field.as_str();
    let lower_bound = Bson::DateTime(bson::DateTime::from_chrono(since));

    let mut newer = Document::new();
    newer.insert(field, doc! { "$gte": lower_bound });

    match incremental.missing_field {
        MissingTimestampPolicy::Exclude => newer,
        MissingTimestampPolicy::Include => {
            let mut untagged = Document::new();
            untagged.insert(field, doc! { "$exists": false });
            doc! { "$or": [newer, untagged] }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::matches_filter;
    use chrono::{TimeZone, Utc};

    fn since() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_full_copy_is_empty_filter() {
        assert_eq!(build_predicate(None), doc! {});
    }

    #[test]
    fn test_incremental_without_since_copies_everything() {
        let incremental = IncrementalConfig::new("updatedAt", None);
        assert_eq!(build_predicate(Some(&incremental)), doc! {});
    }

    #[test]
    fn test_incremental_gte() {
        let incremental = IncrementalConfig::new("updatedAt", Some(since()));
        let predicate = build_predicate(Some(&incremental));
        assert_eq!(
            predicate,
            doc! { "updatedAt": { "$gte": bson::DateTime::from_chrono(since()) } }
        );
    }

    #[test]
    fn test_include_missing_uses_or() {
        let incremental = IncrementalConfig {
            missing_field: MissingTimestampPolicy::Include,
            ..IncrementalConfig::new("ts", Some(since()))
        };
        let predicate = build_predicate(Some(&incremental));

        let before = bson::DateTime::from_chrono(since() - chrono::Duration::days(1));
        let after = bson::DateTime::from_chrono(since() + chrono::Duration::days(1));
        assert!(matches_filter(&doc! { "ts": after }, &predicate));
        assert!(matches_filter(&doc! { "other": 1 }, &predicate));
        assert!(!matches_filter(&doc! { "ts": before }, &predicate));
    }

    #[test]
    fn test_exclude_missing_skips_untagged() {
        let incremental = IncrementalConfig::new("ts", Some(since()));
        let predicate = build_predicate(Some(&incremental));
        assert!(!matches_filter(&doc! { "other": 1 }, &predicate));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let incremental = IncrementalConfig::new("ts", Some(since()));
        let predicate = build_predicate(Some(&incremental));
        assert!(matches_filter(&doc! { "ts": bson::DateTime::from_chrono(since()) }, &predicate));
    }
}
