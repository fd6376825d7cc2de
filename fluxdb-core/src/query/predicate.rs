//! Predicate evaluation for FIND queries
//!
//! A query document maps field names to constraints. A constraint is
//! either a leaf value (equality) or an object of `$gt`/`$lt`/`$gte`/
//! `$lte`/`$ne` operators. Constraints AND together, both within a field
//! and across fields.

use crate::{Document, Value};
use std::cmp::Ordering;

/// True iff the document satisfies every constraint in the query
pub fn matches(doc: &Document, query: &Document) -> bool {
    query.iter().all(|(field, constraint)| {
        doc.get(field)
            .is_some_and(|value| check_condition(value, constraint))
    })
}

fn check_condition(value: &Value, constraint: &Value) -> bool {
    let Value::Object(ops) = constraint else {
        return value == constraint;
    };

    ops.iter().all(|(op, criterion)| match op.as_str() {
        "$gt" => ordered(value, criterion) == Some(Ordering::Greater),
        "$lt" => ordered(value, criterion) == Some(Ordering::Less),
        "$gte" => matches!(ordered(value, criterion), Some(Ordering::Greater | Ordering::Equal)),
        "$lte" => matches!(ordered(value, criterion), Some(Ordering::Less | Ordering::Equal)),
        "$ne" => value != criterion,
        // unknown operators do not constrain
        _ => true,
    })
}

/// Same-kind comparison; `None` when the kinds cannot be ordered, which
/// makes the constraint fail silently
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
