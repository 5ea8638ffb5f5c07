//! Per-key merge functions.
//!
//! Records of one primary key may be spread over many files written at
//! different times. A [`MergeFunction`] folds those versions, oldest to
//! newest, into the one row a reader should see. Flush, compaction and reads
//! all resolve a key through the same function, so the result never depends
//! on which files happen to be merged together.
//!
//! The engine is picked once from [`MergeEngine`] when the table is opened.
//! Every merge of a key works on its own instance obtained via
//! [`MergeFunction::copy`], so no accumulator state leaks between keys.

use crate::config::MergeEngine;
use crate::error::{Error, Result};
use crate::types::{KeyValue, Row, RowKind, Value};
use serde::{Deserialize, Serialize};

/// Aggregation applied to one value column by the aggregation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Sum of all non-null inputs. Int and Double inputs may be mixed.
    Sum,
    /// Smallest non-null input.
    Min,
    /// Largest non-null input.
    Max,
    /// The newest input, null included.
    LastValue,
    /// The newest non-null input.
    LastNonNullValue,
    /// Logical AND of all non-null boolean inputs.
    BoolAnd,
    /// Logical OR of all non-null boolean inputs.
    BoolOr,
}

impl AggregateFunction {
    /// Fold `input` into the accumulated value `acc`.
    pub fn aggregate(self, acc: &Value, input: &Value) -> Result<Value> {
        use AggregateFunction::*;

        match self {
            LastValue => return Ok(input.clone()),
            LastNonNullValue => {
                return Ok(if input.is_null() { acc.clone() } else { input.clone() });
            }
            _ => {}
        }

        if input.is_null() {
            return Ok(acc.clone());
        }
        if acc.is_null() {
            return self.check_input(input).map(|_| input.clone());
        }

        match self {
            Sum => match (acc, input) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_add(*b)
                    .map(Value::Int)
                    .ok_or_else(|| Error::invalid_argument("Integer overflow in sum aggregation")),
                (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
                (Value::Int(a), Value::Double(b)) => Ok(Value::Double(*a as f64 + b)),
                (Value::Double(a), Value::Int(b)) => Ok(Value::Double(a + *b as f64)),
                _ => Err(self.mismatch(acc, input)),
            },
            Min | Max => {
                let ordering = acc.compare(input).ok_or_else(|| self.mismatch(acc, input))?;
                let keep_acc = match self {
                    Min => ordering.is_le(),
                    _ => ordering.is_ge(),
                };
                Ok(if keep_acc { acc.clone() } else { input.clone() })
            }
            BoolAnd | BoolOr => match (acc, input) {
                (Value::Bool(a), Value::Bool(b)) => {
                    Ok(Value::Bool(if self == BoolAnd { *a && *b } else { *a || *b }))
                }
                _ => Err(self.mismatch(acc, input)),
            },
            LastValue | LastNonNullValue => Ok(input.clone()),
        }
    }

    fn check_input(self, input: &Value) -> Result<()> {
        let ok = match self {
            AggregateFunction::Sum => matches!(input, Value::Int(_) | Value::Double(_)),
            AggregateFunction::BoolAnd | AggregateFunction::BoolOr => {
                matches!(input, Value::Bool(_))
            }
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!("{:?} cannot aggregate {:?}", self, input)))
        }
    }

    fn mismatch(self, acc: &Value, input: &Value) -> Error {
        Error::invalid_argument(format!("{:?} cannot aggregate {:?} with {:?}", self, acc, input))
    }
}

/// Keeps the newest version of a key.
#[derive(Debug, Clone, Default)]
pub struct DeduplicateMerge {
    latest: Option<KeyValue>,
}

/// Overlays the non-null fields of newer versions on older ones.
#[derive(Debug, Clone, Default)]
pub struct PartialUpdateMerge {
    latest: Option<KeyValue>,
    fields: Vec<Value>,
}

/// Aggregates every value column with its configured function.
#[derive(Debug, Clone, Default)]
pub struct AggregateMerge {
    functions: Vec<AggregateFunction>,
    latest: Option<KeyValue>,
    fields: Vec<Value>,
}

impl AggregateMerge {
    fn function(&self, pos: usize) -> AggregateFunction {
        self.functions.get(pos).copied().unwrap_or(AggregateFunction::LastNonNullValue)
    }
}

/// Reduces the versions of one primary key to a single row.
///
/// Contract: `reset()` clears the accumulator, `add()` is called once per
/// version in strictly increasing sequence order, `value()` returns the
/// resolved record or `None` when the key is logically deleted.
#[derive(Debug, Clone)]
pub enum MergeFunction {
    /// Last write wins.
    Deduplicate(DeduplicateMerge),
    /// Field-level last write wins.
    PartialUpdate(PartialUpdateMerge),
    /// Per-column aggregation.
    Aggregation(AggregateMerge),
}

impl MergeFunction {
    /// Build the merge function of a merge engine.
    pub fn from_engine(engine: &MergeEngine) -> Self {
        match engine {
            MergeEngine::Deduplicate => MergeFunction::Deduplicate(DeduplicateMerge::default()),
            MergeEngine::PartialUpdate => {
                MergeFunction::PartialUpdate(PartialUpdateMerge::default())
            }
            MergeEngine::Aggregation(functions) => MergeFunction::Aggregation(AggregateMerge {
                functions: functions.clone(),
                ..AggregateMerge::default()
            }),
        }
    }

    /// Whether this function accepts delete records.
    ///
    /// Partial update and aggregation cannot retract a value that was
    /// already folded into another file, so they reject deletes.
    pub fn supports_delete(&self) -> bool {
        matches!(self, MergeFunction::Deduplicate(_))
    }

    /// Clear the accumulated state.
    pub fn reset(&mut self) {
        match self {
            MergeFunction::Deduplicate(m) => m.latest = None,
            MergeFunction::PartialUpdate(m) => {
                m.latest = None;
                m.fields.clear();
            }
            MergeFunction::Aggregation(m) => {
                m.latest = None;
                m.fields.clear();
            }
        }
    }

    /// Fold one more version of the current key.
    pub fn add(&mut self, kv: &KeyValue) -> Result<()> {
        if let Some(prev) = self.latest() {
            if kv.key != prev.key {
                return Err(Error::invalid_state("Merge function received a different key"));
            }
            if kv.sequence <= prev.sequence {
                return Err(Error::invalid_state(format!(
                    "Versions must be added in increasing sequence order: {} after {}",
                    kv.sequence, prev.sequence
                )));
            }
        }
        if kv.kind == RowKind::Delete && !self.supports_delete() {
            return Err(Error::invalid_argument(format!(
                "{} merge does not accept delete records",
                self.name()
            )));
        }

        match self {
            MergeFunction::Deduplicate(m) => m.latest = Some(kv.clone()),
            MergeFunction::PartialUpdate(m) => {
                let fields = kv.value.fields();
                if m.fields.len() < fields.len() {
                    m.fields.resize(fields.len(), Value::Null);
                }
                for (pos, value) in fields.iter().enumerate() {
                    if !value.is_null() {
                        m.fields[pos] = value.clone();
                    }
                }
                m.latest = Some(header(kv));
            }
            MergeFunction::Aggregation(m) => {
                let fields = kv.value.fields();
                if m.fields.len() < fields.len() {
                    m.fields.resize(fields.len(), Value::Null);
                }
                for (pos, value) in fields.iter().enumerate() {
                    let merged = m.function(pos).aggregate(&m.fields[pos], value)?;
                    m.fields[pos] = merged;
                }
                m.latest = Some(header(kv));
            }
        }
        Ok(())
    }

    /// The resolved record, or `None` if the key is deleted or nothing was added.
    pub fn value(&self) -> Option<KeyValue> {
        match self {
            MergeFunction::Deduplicate(m) => {
                m.latest.as_ref().filter(|kv| kv.kind.is_add()).cloned()
            }
            MergeFunction::PartialUpdate(PartialUpdateMerge { latest, fields })
            | MergeFunction::Aggregation(AggregateMerge { latest, fields, .. }) => {
                latest.as_ref().map(|kv| KeyValue { value: Row(fields.clone()), ..kv.clone() })
            }
        }
    }

    /// An independent instance with the same configuration and no state.
    pub fn copy(&self) -> Self {
        let mut copy = self.clone();
        copy.reset();
        copy
    }

    fn latest(&self) -> Option<&KeyValue> {
        match self {
            MergeFunction::Deduplicate(m) => m.latest.as_ref(),
            MergeFunction::PartialUpdate(m) => m.latest.as_ref(),
            MergeFunction::Aggregation(m) => m.latest.as_ref(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            MergeFunction::Deduplicate(_) => "deduplicate",
            MergeFunction::PartialUpdate(_) => "partial-update",
            MergeFunction::Aggregation(_) => "aggregation",
        }
    }
}

// key, sequence and kind of the newest version, without its fields
fn header(kv: &KeyValue) -> KeyValue {
    KeyValue::new(kv.key.clone(), kv.sequence, kv.kind, Row::default())
}
