//! Field-level spec comparison.
//!
//! Each spec field is compared by a [`FieldComparator`] that emits the
//! [`StateChange`]s for it. How absent values compare is decided per field
//! by an [`Absence`] policy.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::change::StateChange;

/// How absent values compare for a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Absence {
    /// `null` and a missing field are the same; an explicitly empty value is not.
    #[default]
    NullIsMissing,
    /// `null`, missing, `""`, `[]` and `{}` are all the same.
    EmptyIsMissing,
}

impl Absence {
    /// Normalize a field value: `None` means "unset" under this policy.
    pub fn normalize<'a>(&self, value: Option<&'a Value>) -> Option<&'a Value> {
        match value {
            None | Some(Value::Null) => None,
            Some(v) if *self == Absence::EmptyIsMissing && is_empty(v) => None,
            Some(v) => Some(v),
        }
    }
}

/// `Some(None)` for a missing map, `None` for a non-map value.
fn as_map(value: Option<&Value>) -> Option<Option<&Map<String, Value>>> {
    match value {
        None => Some(None),
        Some(Value::Object(m)) => Some(Some(m)),
        Some(_) => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Compares one spec field.
pub trait FieldComparator: Send + Sync {
    /// Emit state changes for `name`, given the normalized before/after values.
    fn compare(
        &self,
        name: &str,
        before: Option<&Value>,
        after: Option<&Value>,
    ) -> Vec<StateChange>;
}

/// Whole-value equality: one state change named after the field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueComparator;

impl FieldComparator for ValueComparator {
    fn compare(
        &self,
        name: &str,
        before: Option<&Value>,
        after: Option<&Value>,
    ) -> Vec<StateChange> {
        if before.is_none() && after.is_none() {
            return Vec::new();
        }
        vec![StateChange::new(name, before.cloned(), after.cloned())]
    }
}

/// Map fields compared entry by entry (`configs.retention.ms`, ...).
///
/// Entries come out sorted by key. A side that is not a map is compared as
/// a whole value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntriesComparator {
    pub entry_absence: Absence,
}

impl FieldComparator for EntriesComparator {
    fn compare(
        &self,
        name: &str,
        before: Option<&Value>,
        after: Option<&Value>,
    ) -> Vec<StateChange> {
        let (Some(before_map), Some(after_map)) = (as_map(before), as_map(after)) else {
            return ValueComparator.compare(name, before, after);
        };

        let keys: BTreeSet<&String> = before_map
            .into_iter()
            .flat_map(|m| m.keys())
            .chain(after_map.into_iter().flat_map(|m| m.keys()))
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let b = self.entry_absence.normalize(before_map.and_then(|m| m.get(key)));
                let a = self.entry_absence.normalize(after_map.and_then(|m| m.get(key)));
                if b.is_none() && a.is_none() {
                    return None;
                }
                Some(StateChange::new(format!("{}.{}", name, key), b.cloned(), a.cloned()))
            })
            .collect()
    }
}

/// A declared spec field.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub absence: Absence,
    comparator: Arc<dyn FieldComparator>,
}

impl FieldSpec {
    /// Field compared by whole-value equality.
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            absence: Absence::default(),
            comparator: Arc::new(ValueComparator),
        }
    }

    /// Map field compared entry by entry.
    pub fn entries(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            absence: Absence::EmptyIsMissing,
            comparator: Arc::new(EntriesComparator::default()),
        }
    }

    /// Field with a custom comparator.
    pub fn custom(name: impl Into<String>, comparator: Arc<dyn FieldComparator>) -> Self {
        Self {
            name: name.into(),
            absence: Absence::default(),
            comparator,
        }
    }

    pub fn with_absence(mut self, absence: Absence) -> Self {
        self.absence = absence;
        self
    }

    pub fn compare(&self, before: Option<&Value>, after: Option<&Value>) -> Vec<StateChange> {
        self.comparator.compare(
            &self.name,
            self.absence.normalize(before),
            self.absence.normalize(after),
        )
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("absence", &self.absence)
            .finish_non_exhaustive()
    }
}

/// Compare two specs: declared fields first, in declaration order, then the
/// remaining fields by name with [`ValueComparator`].
///
/// Non-object specs are compared as a single `spec` value.
pub fn compare_specs(fields: &[FieldSpec], before: &Value, after: &Value) -> Vec<StateChange> {
    let (Value::Object(b), Value::Object(a)) = (before, after) else {
        return FieldSpec::value("spec").compare(Some(before), Some(after));
    };

    let mut changes = Vec::new();
    for field in fields {
        changes.extend(field.compare(b.get(&field.name), a.get(&field.name)));
    }

    let rest: BTreeSet<&String> = b
        .keys()
        .chain(a.keys())
        .filter(|k| !fields.iter().any(|f| &f.name == *k))
        .collect();
    for key in rest {
        changes.extend(FieldSpec::value(key.as_str()).compare(b.get(key), a.get(key)));
    }
    changes
}
