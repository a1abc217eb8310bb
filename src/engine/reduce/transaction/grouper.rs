use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::engine::errors::{RecordError, ReduceError};
use crate::engine::reduce::context::QueryContext;
use crate::engine::reduce::expr::BoolExpr;
use crate::engine::reduce::record_set::Record;
use crate::engine::types::FieldValue;

const STAGE: &str = "transaction";

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Fields whose values form the transaction key; defaults to the time field
    pub fields: Vec<String>,
    /// A closed key opens only on a matching record (otherwise on any record)
    pub starts_with: Option<Arc<dyn BoolExpr>>,
    /// An open key closes on a matching record, which is kept in the group
    pub ends_with: Option<Arc<dyn BoolExpr>>,
    /// Overrides `reduce.time_field`
    pub time_field: Option<String>,
}

impl TransactionOptions {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn starting_with(mut self, expr: Arc<dyn BoolExpr>) -> Self {
        self.starts_with = Some(expr);
        self
    }

    pub fn ending_with(mut self, expr: Arc<dyn BoolExpr>) -> Self {
        self.ends_with = Some(expr);
        self
    }

    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = Some(field.into());
        self
    }
}

/// Where one key stands between a start and an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub open: bool,
    pub anchor_id: String,
    pub anchor_ts: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEvent {
    pub id: String,
    pub ts: i64,
    pub record: Record,
}

/// A closed transaction: the events of one key from its anchor onwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionGroup {
    pub key: String,
    pub anchor_id: String,
    pub anchor_ts: i64,
    pub events: Vec<TransactionEvent>,
}

impl TransactionGroup {
    pub fn duration(&self) -> i64 {
        self.events
            .last()
            .map_or(0, |last| (last.ts - self.anchor_ts).abs())
    }

    /// Output row keyed by the anchor record's id.
    ///
    /// Carries `timestamp`, `duration`, `eventcount`, `event` (members as
    /// JSON objects), `transactionKey` and the key fields copied from the
    /// last event.
    pub fn into_record(self, fields: &[String]) -> Result<(String, Record), ReduceError> {
        let duration = self.duration();
        let mut row = Record::with_capacity(5 + fields.len());
        row.insert("timestamp".to_string(), FieldValue::Int64(self.anchor_ts));
        row.insert("duration".to_string(), FieldValue::Int64(duration));
        row.insert(
            "eventcount".to_string(),
            FieldValue::Int64(self.events.len() as i64),
        );

        let mut members = Vec::with_capacity(self.events.len());
        for event in &self.events {
            members.push(serde_json::to_string(&event.record)?);
        }
        row.insert("event".to_string(), FieldValue::Utf8List(members));
        row.insert("transactionKey".to_string(), FieldValue::from(self.key));

        if let Some(last) = self.events.last() {
            for field in fields {
                if let Some(value) = last.record.get(field) {
                    row.insert(field.clone(), value.clone());
                }
            }
        }
        Ok((self.anchor_id, row))
    }
}

#[derive(Debug)]
struct KeySlot {
    state: TransactionState,
    events: Vec<TransactionEvent>,
}

impl KeySlot {
    fn open_at(&mut self, id: &str, ts: i64) {
        self.state = TransactionState {
            open: true,
            anchor_id: id.to_string(),
            anchor_ts: ts,
        };
        self.events.clear();
    }

    fn take_group(&mut self, key: &str) -> Option<TransactionGroup> {
        if self.events.is_empty() {
            return None;
        }
        Some(TransactionGroup {
            key: key.to_string(),
            anchor_id: self.state.anchor_id.clone(),
            anchor_ts: self.state.anchor_ts,
            events: std::mem::take(&mut self.events),
        })
    }
}

/// Per-key state machine over a time-ordered record stream.
///
/// Callers feed records in non-decreasing time order. A key is closed until
/// a start matches (any record when no start predicate is set) and open
/// until an end matches. With a start but no end, a new start closes the
/// running group and reopens at that record.
#[derive(Debug)]
pub struct TransactionGrouper {
    fields: Vec<String>,
    starts_with: Option<Arc<dyn BoolExpr>>,
    ends_with: Option<Arc<dyn BoolExpr>>,
    keys: IndexMap<String, KeySlot>,
    skipped: u64,
}

impl TransactionGrouper {
    pub fn new(fields: Vec<String>, options: &TransactionOptions) -> Self {
        Self {
            fields,
            starts_with: options.starts_with.clone(),
            ends_with: options.ends_with.clone(),
            keys: IndexMap::new(),
            skipped: 0,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_end(&self) -> bool {
        self.ends_with.is_some()
    }

    /// `_v1_v2...` over the key fields present on the record; empty when none are.
    pub fn key_of(&self, record: &Record) -> String {
        let mut key = String::new();
        for field in &self.fields {
            if let Some(value) = record.get(field) {
                if !value.is_null() {
                    key.push('_');
                    key.push_str(&value.to_string_repr());
                }
            }
        }
        key
    }

    pub fn state(&self, key: &str) -> Option<&TransactionState> {
        self.keys.get(key).map(|slot| &slot.state)
    }

    /// Records that joined no group: empty key, or arrived while their key was closed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn open_keys(&self) -> usize {
        self.keys.values().filter(|slot| slot.state.open).count()
    }

    /// Feeds one record; returns the group it closed, if any.
    pub fn feed(
        &mut self,
        ctx: &mut QueryContext,
        id: &str,
        ts: i64,
        record: Record,
    ) -> Option<TransactionGroup> {
        let key = self.key_of(&record);
        if key.is_empty() {
            self.skipped += 1;
            return None;
        }

        let starts_with = self.starts_with.as_deref();
        let ends_with = self.ends_with.as_deref();
        let slot = self.keys.entry(key.clone()).or_insert_with(|| KeySlot {
            state: TransactionState {
                open: false,
                anchor_id: id.to_string(),
                anchor_ts: 0,
            },
            events: Vec::new(),
        });

        let mut closed = None;
        if !slot.state.open {
            if starts_with.is_none_or(|expr| matches(ctx, expr, id, &record)) {
                slot.open_at(id, ts);
            }
        } else if let (Some(expr), None) = (starts_with, ends_with) {
            if matches(ctx, expr, id, &record) {
                closed = slot.take_group(&key);
                slot.open_at(id, ts);
            }
        }

        if !slot.state.open {
            self.skipped += 1;
            return closed;
        }
        slot.events.push(TransactionEvent {
            id: id.to_string(),
            ts,
            record,
        });

        let ends = ends_with.is_some_and(|expr| {
            let last = slot.events.last().map(|event| &event.record);
            last.is_some_and(|record| matches(ctx, expr, id, record))
        });
        if ends {
            closed = slot.take_group(&key);
            slot.state.open = false;
            slot.state.anchor_ts = 0;
            slot.state.anchor_id = id.to_string();
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(
                target: "snel_reduce::transaction",
                key = %key,
                open = slot.state.open,
                pending = slot.events.len(),
                "Fed record"
            );
        }
        closed
    }

    /// Closes every open key, in first-seen key order.
    pub fn close_all(&mut self) -> Vec<TransactionGroup> {
        let mut groups = Vec::new();
        for (key, slot) in self.keys.iter_mut() {
            if slot.state.open {
                if let Some(group) = slot.take_group(key) {
                    groups.push(group);
                }
                slot.state.open = false;
            }
        }
        groups
    }

    /// Events still waiting in open groups.
    pub fn pending_events(&self) -> usize {
        self.keys.values().map(|slot| slot.events.len()).sum()
    }
}

/// Predicate outcome; evaluation failures count as no match.
fn matches(ctx: &mut QueryContext, expr: &dyn BoolExpr, id: &str, record: &Record) -> bool {
    match expr.evaluate_bool(record) {
        Ok(hit) => hit,
        Err(err) if err.is_null_field() => false,
        Err(err) => {
            ctx.push_error(RecordError::new(STAGE, Some(id), err.to_string()));
            false
        }
    }
}
