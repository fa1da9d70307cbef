//! Aggregation pipeline evaluation for in-process documents.
//!
//! Supported stages: `$match`, `$project`, `$group`, `$sort`, `$limit`.
//! Expressions: `"$field.path"` references, literals, `$avg` and `$sum`.

use bson::{Bson, Document};
use tally_core::DocumentError;

use crate::query::{
    as_f64, compare_values, malformed, matches, resolve_path, unsupported, values_equal,
};

/// Run `pipeline` over `docs`.
pub fn run_pipeline(
    docs: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, DocumentError> {
    pipeline.iter().try_fold(docs, |docs, stage| run_stage(docs, stage))
}

fn run_stage(docs: Vec<Document>, stage: &Document) -> Result<Vec<Document>, DocumentError> {
    let mut entries = stage.iter();
    let (Some((name, body)), None) = (entries.next(), entries.next()) else {
        return Err(malformed("a pipeline stage must have exactly one field"));
    };
    match name.as_str() {
        "$match" => {
            let filter = as_document(name, body)?;
            let mut kept = Vec::with_capacity(docs.len());
            for doc in docs {
                if matches(&doc, filter)? {
                    kept.push(doc);
                }
            }
            Ok(kept)
        }
        "$project" => {
            let body = as_document(name, body)?;
            docs.iter().map(|doc| project(doc, body)).collect()
        }
        "$group" => group(&docs, as_document(name, body)?),
        "$sort" => sort(docs, as_document(name, body)?),
        "$limit" => {
            let limit = as_f64(body)
                .filter(|n| *n >= 1.0 && n.fract() == 0.0)
                .ok_or_else(|| {
                    malformed(format!("$limit must be a positive integer, got {}", body))
                })?;
            Ok(docs.into_iter().take(limit as usize).collect())
        }
        other => Err(unsupported("pipeline stage", other)),
    }
}

fn as_document<'a>(stage: &str, body: &'a Bson) -> Result<&'a Document, DocumentError> {
    match body {
        Bson::Document(doc) => Ok(doc),
        other => Err(malformed(format!("{} expects a document, got {}", stage, other))),
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Evaluate an expression against `doc`. `None` means the value is missing.
fn evaluate(doc: &Document, expr: &Bson) -> Result<Option<Bson>, DocumentError> {
    match expr {
        Bson::String(s) if s.starts_with('$') => Ok(resolve_path(doc, &s[1..])),
        Bson::Document(inner) => {
            let mut entries = inner.iter();
            match (entries.next(), entries.next()) {
                (Some((op, arg)), None) if op.starts_with('$') => {
                    let value = evaluate(doc, arg)?;
                    let numbers = numeric_operands(value.as_ref());
                    match op.as_str() {
                        "$avg" => Ok(Some(average(&numbers))),
                        "$sum" => Ok(Some(sum(&numbers))),
                        other => Err(unsupported("expression operator", other)),
                    }
                }
                _ => Ok(Some(expr.clone())),
            }
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn numeric_operands(value: Option<&Bson>) -> Vec<Bson> {
    match value {
        Some(Bson::Array(items)) => items.iter().filter(|v| as_f64(v).is_some()).cloned().collect(),
        Some(v) if as_f64(v).is_some() => vec![v.clone()],
        _ => Vec::new(),
    }
}

fn average(numbers: &[Bson]) -> Bson {
    if numbers.is_empty() {
        return Bson::Null;
    }
    let total: f64 = numbers.iter().filter_map(as_f64).sum();
    Bson::Double(total / numbers.len() as f64)
}

fn sum(numbers: &[Bson]) -> Bson {
    let mut acc = SumState::default();
    for n in numbers {
        acc.add(n);
    }
    acc.finish()
}

/// Running `$sum` that stays integral until a double is added.
#[derive(Debug, Default, Clone)]
struct SumState {
    int: i64,
    float: f64,
    is_float: bool,
}

impl SumState {
    fn add(&mut self, value: &Bson) {
        match value {
            Bson::Int32(n) => self.add_int(i64::from(*n)),
            Bson::Int64(n) => self.add_int(*n),
            Bson::Double(x) => {
                self.is_float = true;
                self.float += x;
            }
            _ => {}
        }
    }

    fn add_int(&mut self, n: i64) {
        match self.int.checked_add(n) {
            Some(total) => self.int = total,
            None => {
                self.is_float = true;
                self.float += n as f64;
            }
        }
    }

    fn finish(&self) -> Bson {
        if self.is_float {
            Bson::Double(self.float + self.int as f64)
        } else if let Ok(small) = i32::try_from(self.int) {
            Bson::Int32(small)
        } else {
            Bson::Int64(self.int)
        }
    }
}

// ============================================================================
// $project
// ============================================================================

fn is_flag(value: &Bson) -> Option<bool> {
    match value {
        Bson::Boolean(b) => Some(*b),
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => as_f64(value).map(|n| n != 0.0),
        _ => None,
    }
}

fn project(doc: &Document, body: &Document) -> Result<Document, DocumentError> {
    let exclusion = body
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .any(|(_, value)| is_flag(value) == Some(false));

    if exclusion {
        let mut out = doc.clone();
        for (field, value) in body {
            match is_flag(value) {
                Some(false) => {
                    out.remove(field);
                }
                _ if field.as_str() == "_id" => {}
                _ => {
                    return Err(malformed(format!(
                        "cannot mix inclusion of {} with exclusion",
                        field
                    )))
                }
            }
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let keep_id = body.get("_id").and_then(is_flag).unwrap_or(true);
    if keep_id && !body.get("_id").is_some_and(|v| is_flag(v).is_none()) {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (field, value) in body {
        let projected = match is_flag(value) {
            Some(true) => resolve_path(doc, field),
            Some(false) => continue,
            None => evaluate(doc, value)?,
        };
        if let Some(projected) = projected {
            out.insert(field.as_str(), projected);
        }
    }
    Ok(out)
}

// ============================================================================
// $group
// ============================================================================

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(SumState),
    Avg { total: f64, count: u64 },
}

impl Accumulator {
    fn add(&mut self, value: Option<&Bson>) {
        match self {
            Accumulator::Sum(state) => {
                if let Some(v) = value {
                    state.add(v);
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(x) = value.and_then(as_f64) {
                    *total += x;
                    *count += 1;
                }
            }
        }
    }

    fn finish(&self) -> Bson {
        match self {
            Accumulator::Sum(state) => state.finish(),
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / *count as f64),
        }
    }
}

struct GroupField<'a> {
    name: &'a str,
    operator: &'a str,
    operand: &'a Bson,
}

fn group_fields(body: &Document) -> Result<Vec<GroupField<'_>>, DocumentError> {
    body.iter()
        .filter(|(name, _)| name.as_str() != "_id")
        .map(|(name, accumulator)| {
            let Bson::Document(accumulator) = accumulator else {
                return Err(malformed(format!("group field {} needs an accumulator", name)));
            };
            let mut entries = accumulator.iter();
            match (entries.next(), entries.next()) {
                (Some((op, operand)), None) => match op.as_str() {
                    "$sum" | "$avg" => Ok(GroupField {
                        name: name.as_str(),
                        operator: op.as_str(),
                        operand,
                    }),
                    other => Err(unsupported("accumulator", other)),
                },
                _ => Err(malformed(format!("group field {} needs exactly one accumulator", name))),
            }
        })
        .collect()
}

fn group(docs: &[Document], body: &Document) -> Result<Vec<Document>, DocumentError> {
    let key_expr = body
        .get("_id")
        .ok_or_else(|| malformed("$group requires an _id expression"))?;
    let fields = group_fields(body)?;

    // Groups keep first-seen order.
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for doc in docs {
        let key = evaluate(doc, key_expr)?.unwrap_or(Bson::Null);
        let index = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
            Some(index) => index,
            None => {
                let fresh = fields
                    .iter()
                    .map(|field| match field.operator {
                        "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
                        _ => Accumulator::Sum(SumState::default()),
                    })
                    .collect();
                groups.push((key, fresh));
                groups.len() - 1
            }
        };
        let accumulators = &mut groups[index].1;
        for (field, accumulator) in fields.iter().zip(accumulators.iter_mut()) {
            let value = evaluate(doc, field.operand)?;
            accumulator.add(value.as_ref());
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for (field, accumulator) in fields.iter().zip(&accumulators) {
                out.insert(field.name, accumulator.finish());
            }
            out
        })
        .collect())
}

// ============================================================================
// $sort
// ============================================================================

fn sort(mut docs: Vec<Document>, body: &Document) -> Result<Vec<Document>, DocumentError> {
    let mut keys = Vec::with_capacity(body.len());
    for (field, direction) in body {
        let descending = match as_f64(direction) {
            Some(d) if d == 1.0 => false,
            Some(d) if d == -1.0 => true,
            _ => {
                return Err(malformed(format!(
                    "sort direction for {} must be 1 or -1",
                    field
                )))
            }
        };
        keys.push((field.as_str(), descending));
    }
    if keys.is_empty() {
        return Err(malformed("$sort needs at least one key"));
    }

    docs.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = compare_values(
                    resolve_path(a, field).as_ref(),
                    resolve_path(b, field).as_ref(),
                );
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(docs)
}
