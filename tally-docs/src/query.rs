//! Filter and update evaluation for in-process documents.
//!
//! Covers the query subset TALLY issues: field equality (with dotted paths
//! and array membership), comparison operators, `$in`, `$exists`, `$and`,
//! `$or`, and `$set`/`$unset` updates. Anything else is rejected as
//! unsupported rather than silently mis-evaluated.

use std::cmp::Ordering;

use bson::{Bson, Document};
use tally_core::DocumentError;

// ============================================================================
// VALUE HELPERS
// ============================================================================

/// Numeric value of `value`, if it is any BSON number.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(x) => Some(*x),
        _ => None,
    }
}

/// Resolve a dotted `path` in `doc`.
///
/// Arrays met along the way fan out: `topics.score` over an array of
/// sub-documents yields an array of their scores.
pub fn resolve_path(doc: &Document, path: &str) -> Option<Bson> {
    let mut parts = path.splitn(2, '.');
    let head = parts.next()?;
    let value = doc.get(head)?;
    match parts.next() {
        None => Some(value.clone()),
        Some(rest) => resolve_in(value, rest),
    }
}

fn resolve_in(value: &Bson, rest: &str) -> Option<Bson> {
    match value {
        Bson::Document(inner) => resolve_path(inner, rest),
        Bson::Array(items) => {
            let collected: Vec<Bson> = items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(inner) => resolve_path(inner, rest),
                    _ => None,
                })
                .collect();
            Some(Bson::Array(collected))
        }
        _ => None,
    }
}

/// Equality with numeric types unified, so `80` matches `80.0`.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) | Some(Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(_) => 10,
    }
}

/// Total order over optional values: missing and null sort first, then
/// numbers, strings, and the remaining types by kind.
pub fn compare_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => match (as_f64(x), as_f64(y)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => match (x, y) {
                (Bson::String(x), Bson::String(y)) => x.cmp(y),
                (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
                (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
                (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
        },
        _ => Ordering::Equal,
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, DocumentError> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => clauses(key, condition)?
                .iter()
                .map(|clause| matches(doc, clause))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .all(|hit| hit),
            "$or" => clauses(key, condition)?
                .iter()
                .map(|clause| matches(doc, clause))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .any(|hit| hit),
            op if op.starts_with('$') => {
                return Err(unsupported("query operator", op));
            }
            path => field_satisfies(resolve_path(doc, path).as_ref(), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(key: &str, condition: &'a Bson) -> Result<Vec<&'a Document>, DocumentError> {
    let Bson::Array(items) = condition else {
        return Err(malformed(format!("{} expects an array", key)));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            other => Err(malformed(format!("{} clause is not a document: {}", key, other))),
        })
        .collect()
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(inner) if inner.keys().next().is_some_and(|k| k.starts_with('$')) => {
            Some(inner)
        }
        _ => None,
    }
}

fn field_satisfies(value: Option<&Bson>, condition: &Bson) -> Result<bool, DocumentError> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(field_equals(value, condition));
    };
    for (op, operand) in operators {
        let satisfied = match op.as_str() {
            "$eq" => field_equals(value, operand),
            "$ne" => !field_equals(value, operand),
            "$in" => match operand {
                Bson::Array(options) => options.iter().any(|option| field_equals(value, option)),
                _ => return Err(malformed("$in expects an array")),
            },
            "$nin" => match operand {
                Bson::Array(options) => !options.iter().any(|option| field_equals(value, option)),
                _ => return Err(malformed("$nin expects an array")),
            },
            "$exists" => {
                let wanted = match operand {
                    Bson::Boolean(b) => *b,
                    other => as_f64(other).is_some_and(|n| n != 0.0),
                };
                value.is_some() == wanted
            }
            "$gt" => compares(value, operand, |o| o == Ordering::Greater),
            "$gte" => compares(value, operand, |o| o != Ordering::Less),
            "$lt" => compares(value, operand, |o| o == Ordering::Less),
            "$lte" => compares(value, operand, |o| o != Ordering::Greater),
            other => return Err(unsupported("query operator", other)),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality match; array fields match when any element is equal.
fn field_equals(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(value) if values_equal(value, target) => true,
        Some(Bson::Array(items)) => items.iter().any(|item| values_equal(item, target)),
        Some(_) => false,
    }
}

/// Range comparison, only between values of the same kind.
fn compares(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |candidate: &Bson| {
        type_rank(Some(candidate)) == type_rank(Some(operand))
            && accept(compare_values(Some(candidate), Some(operand)))
    };
    match value {
        None => false,
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => items.iter().any(check),
        Some(v) => check(v),
    }
}

// ============================================================================
// UPDATES
// ============================================================================

/// Apply an operator `update` to `doc`; returns whether anything changed.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, DocumentError> {
    if update.is_empty() {
        return Err(malformed("update document is empty"));
    }
    let before = doc.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(malformed(format!("{} expects a document", op)));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(doc, path);
                }
            }
            other if other.starts_with('$') => return Err(unsupported("update operator", other)),
            other => {
                return Err(malformed(format!(
                    "update must use operators, found field {}",
                    other
                )))
            }
        }
    }
    Ok(*doc != before)
}

/// Set `path`, creating intermediate sub-documents.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), DocumentError> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(malformed(format!("cannot set {} through a non-document field", path))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

pub(crate) fn unsupported(kind: &'static str, name: &str) -> DocumentError {
    DocumentError::Unsupported {
        kind,
        name: name.to_string(),
    }
}

pub(crate) fn malformed(reason: impl Into<String>) -> DocumentError {
    DocumentError::Malformed {
        reason: reason.into(),
    }
}
