// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for scenario and integration tests.
//!
//! This module provides:
//! - Seeded source stores
//! - A progress reporter that records every event
//! - Timestamped document helpers

#![allow(dead_code)]

use bson::{doc, DateTime as BsonDateTime, Document};
use chrono::{DateTime, TimeZone, Utc};
use collection_replicator::{MemoryStore, ProgressReporter};
use std::sync::Mutex;

/// `n` documents with integer ids `1..=n`.
pub fn numbered_docs(n: usize) -> Vec<Document> {
    (1..=n as i32).map(|i| doc! { "_id": i, "value": format!("v{i}") }).collect()
}

/// A UTC instant on 2026-01-`day`.
pub fn on_day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).single().unwrap()
}

/// A document stamped with `updated_at` on 2026-01-`day`.
pub fn stamped(id: i32, day: u32) -> Document {
    doc! {
        "_id": id,
        "value": format!("v{id}"),
        "updated_at": BsonDateTime::from_chrono(on_day(day)),
    }
}

/// Source with a `users` collection of `n` numbered documents.
pub fn users_source(n: usize) -> MemoryStore {
    MemoryStore::new("source").with_collection("users", numbered_docs(n))
}

/// One recorded progress call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Start { total: u64, label: String },
    Advance(u64),
    Stop,
}

/// Progress reporter that keeps every event for assertions.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressReporter for RecordingProgress {
    fn start(&self, total: u64, label: &str) {
        self.push(ProgressEvent::Start {
            total,
            label: label.to_string(),
        });
    }

    fn advance(&self, processed: u64) {
        self.push(ProgressEvent::Advance(processed));
    }

    fn stop(&self) {
        self.push(ProgressEvent::Stop);
    }
}
