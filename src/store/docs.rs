//! Semi-structured document storage with predicate queries.
//!
//! Documents are JSON objects addressed by id. Field paths are
//! dot-delimited and descend nested objects. An optional per-field value
//! index maps canonicalized values to id sets, giving equality probes O(1);
//! every other predicate falls back to a scan of the candidate set.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// Comparison operator for a query predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `=`
    Eq,
    /// `≠`
    Ne,
    /// `<`
    Lt,
    /// `≤`
    Le,
    /// `>`
    Gt,
    /// `≥`
    Ge,
    /// Substring containment on strings.
    Contains,
    /// String prefix.
    StartsWith,
    /// String suffix.
    EndsWith,
}

impl Operator {
    /// Parse the symbolic or snake_case spelling.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "=" | "==" | "eq" => Ok(Operator::Eq),
            "!=" | "ne" => Ok(Operator::Ne),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "le" => Ok(Operator::Le),
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "ge" => Ok(Operator::Ge),
            "contains" => Ok(Operator::Contains),
            "starts_with" => Ok(Operator::StartsWith),
            "ends_with" => Ok(Operator::EndsWith),
            other => Err(Error::Constraint(format!("unknown operator '{other}'"))),
        }
    }
}

/// One query predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    /// Dot-delimited field path.
    pub field: String,
    /// Comparison operator.
    pub op: Operator,
    /// Comparison operand.
    pub value: Json,
}

/// A stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within the store.
    pub id: String,
    /// Field mapping; nested objects are reachable via dot paths.
    pub fields: IndexMap<String, Json>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last modification instant.
    pub modified_at: DateTime<Utc>,
    /// Optional absolute expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Document {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A document collection with optional per-field equality indices.
///
/// # Examples
///
/// ```rust
/// use fincache::store::{DocumentStore, Operator, Predicate};
/// use serde_json::json;
///
/// let mut store = DocumentStore::new();
/// store.create_index("status");
/// store.set("ord-1", json!({"status": "filled", "qty": 100}), None).unwrap();
/// store.set("ord-2", json!({"status": "open", "qty": 250}), None).unwrap();
///
/// let hits = store.query(
///     &[Predicate { field: "status".into(), op: Operator::Eq, value: json!("open") }],
///     10,
///     0,
/// );
/// assert_eq!(hits.len(), 1);
/// assert_eq!(hits[0].id, "ord-2");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStore {
    documents: HashMap<String, Document>,
    /// field path -> canonical value -> ids.
    indexes: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents, including any not yet swept expired ones.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Insert or replace a document. `data` must be a JSON object.
    pub fn set(&mut self, id: &str, data: Json, ttl: Option<Duration>) -> Result<()> {
        let Json::Object(map) = data else {
            return Err(Error::Constraint("document body must be an object".to_string()));
        };
        let now = Utc::now();
        if let Some(old) = self.documents.remove(id) {
            self.unindex_document(&old);
        }
        let doc = Document {
            id: id.to_string(),
            fields: map.into_iter().collect(),
            created_at: now,
            modified_at: now,
            expires_at: ttl.map(|t| now + t),
        };
        self.index_document(&doc);
        self.documents.insert(id.to_string(), doc);
        Ok(())
    }

    /// Fetch a document; expired documents read as absent.
    pub fn get(&self, id: &str) -> Option<&Document> {
        let doc = self.documents.get(id)?;
        if doc.is_expired(Utc::now()) {
            return None;
        }
        Some(doc)
    }

    /// Delete a document. Returns `true` when it existed.
    pub fn delete(&mut self, id: &str) -> bool {
        match self.documents.remove(id) {
            Some(doc) => {
                self.unindex_document(&doc);
                true
            },
            None => false,
        }
    }

    /// Register an equality index for a field path and backfill it from
    /// the current contents.
    pub fn create_index(&mut self, field_path: &str) {
        if self.indexes.contains_key(field_path) {
            return;
        }
        let mut by_value: HashMap<String, HashSet<String>> = HashMap::new();
        for doc in self.documents.values() {
            if let Some(value) = lookup_path(&doc.fields, field_path) {
                by_value
                    .entry(canonical(value))
                    .or_default()
                    .insert(doc.id.clone());
            }
        }
        self.indexes.insert(field_path.to_string(), by_value);
    }

    /// Indexed field paths.
    pub fn indexed_fields(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Evaluate predicates as an intersection: the first predicate seeds
    /// the candidate set, each later predicate prunes it. Results are
    /// sorted by id for deterministic pagination.
    pub fn query(&self, predicates: &[Predicate], limit: usize, offset: usize) -> Vec<&Document> {
        let now = Utc::now();
        let mut candidates: Option<HashSet<&str>> = None;
        for predicate in predicates {
            let matching = self.matching_ids(predicate, candidates.as_ref(), now);
            if matching.is_empty() {
                return Vec::new();
            }
            candidates = Some(matching);
        }

        let mut ids: Vec<&str> = match candidates {
            Some(set) => set.into_iter().collect(),
            // No predicates: every live document matches.
            None => self
                .documents
                .values()
                .filter(|d| !d.is_expired(now))
                .map(|d| d.id.as_str())
                .collect(),
        };
        ids.sort_unstable();
        ids.into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.documents.get(id))
            .collect()
    }

    /// Drop expired documents. Returns the removal count.
    pub fn purge_expired(&mut self) -> usize {
        let now = Utc::now();
        let doomed: Vec<String> = self
            .documents
            .values()
            .filter(|d| d.is_expired(now))
            .map(|d| d.id.clone())
            .collect();
        for id in &doomed {
            self.delete(id);
        }
        doomed.len()
    }

    /// Approximate heap footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.documents
            .values()
            .map(|d| d.id.len() + d.fields.iter().map(|(k, v)| k.len() + json_size(v)).sum::<usize>() + 64)
            .sum()
    }

    fn matching_ids<'a: 'b, 'b>(
        &'a self,
        predicate: &Predicate,
        within: Option<&'b HashSet<&'a str>>,
        now: DateTime<Utc>,
    ) -> HashSet<&'a str> {
        // Equality over an indexed field probes the value index; the probe
        // set is then intersected with the running candidates.
        if predicate.op == Operator::Eq {
            if let Some(by_value) = self.indexes.get(&predicate.field) {
                let probe = by_value
                    .get(&canonical(&predicate.value))
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| self.documents.get(id))
                            .filter(|d| !d.is_expired(now))
                            .map(|d| d.id.as_str())
                            .collect::<HashSet<&str>>()
                    })
                    .unwrap_or_default();
                return match within {
                    Some(outer) => probe.intersection(outer).copied().collect(),
                    None => probe,
                };
            }
        }

        let scan: Box<dyn Iterator<Item = &'a Document> + 'b> = match within {
            Some(outer) => Box::new(outer.iter().filter_map(|id| self.documents.get(*id))),
            None => Box::new(self.documents.values()),
        };
        scan.filter(|d| !d.is_expired(now))
            .filter(|d| {
                lookup_path(&d.fields, &predicate.field)
                    .is_some_and(|v| evaluate(predicate.op, v, &predicate.value))
            })
            .map(|d| d.id.as_str())
            .collect()
    }

    fn index_document(&mut self, doc: &Document) {
        for (field, by_value) in &mut self.indexes {
            if let Some(value) = lookup_path(&doc.fields, field) {
                by_value
                    .entry(canonical(value))
                    .or_default()
                    .insert(doc.id.clone());
            }
        }
    }

    fn unindex_document(&mut self, doc: &Document) {
        for (field, by_value) in &mut self.indexes {
            if let Some(value) = lookup_path(&doc.fields, field) {
                let key = canonical(value);
                if let Some(ids) = by_value.get_mut(&key) {
                    ids.remove(&doc.id);
                    if ids.is_empty() {
                        by_value.remove(&key);
                    }
                }
            }
        }
    }
}

/// Descend a dot-delimited path through nested objects.
fn lookup_path<'a>(fields: &'a IndexMap<String, Json>, path: &str) -> Option<&'a Json> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Canonical string form used as the value-index key.
fn canonical(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate(op: Operator, stored: &Json, operand: &Json) -> bool {
    match op {
        Operator::Eq => json_eq(stored, operand),
        Operator::Ne => !json_eq(stored, operand),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let Some(ordering) = json_cmp(stored, operand) else {
                return false;
            };
            match op {
                Operator::Lt => ordering.is_lt(),
                Operator::Le => ordering.is_le(),
                Operator::Gt => ordering.is_gt(),
                Operator::Ge => ordering.is_ge(),
                _ => unreachable!(),
            }
        },
        Operator::Contains => match (stored, operand) {
            (Json::String(s), Json::String(needle)) => s.contains(needle.as_str()),
            (Json::Array(items), needle) => items.iter().any(|v| json_eq(v, needle)),
            _ => false,
        },
        Operator::StartsWith => match (stored, operand) {
            (Json::String(s), Json::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Operator::EndsWith => match (stored, operand) {
            (Json::String(s), Json::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
    }
}

fn json_eq(a: &Json, b: &Json) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &Json, b: &Json) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            x.partial_cmp(&y)
        },
    }
}

fn json_size(value: &Json) -> usize {
    match value {
        Json::Null | Json::Bool(_) => 1,
        Json::Number(_) => 8,
        Json::String(s) => s.len(),
        Json::Array(items) => items.iter().map(json_size).sum(),
        Json::Object(map) => map.iter().map(|(k, v)| k.len() + json_size(v)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> DocumentStore {
        let mut store = DocumentStore::new();
        store
            .set(
                "tx-1",
                json!({"amount": 125.0, "merchant": {"name": "acme", "mcc": "5411"}, "tags": ["card"]}),
                None,
            )
            .unwrap();
        store
            .set(
                "tx-2",
                json!({"amount": 980.0, "merchant": {"name": "zenith", "mcc": "6011"}, "tags": ["wire"]}),
                None,
            )
            .unwrap();
        store
            .set(
                "tx-3",
                json!({"amount": 125.0, "merchant": {"name": "acme", "mcc": "5411"}}),
                None,
            )
            .unwrap();
        store
    }

    fn ids(docs: Vec<&Document>) -> Vec<&str> {
        docs.into_iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn rejects_non_object_bodies() {
        let mut store = DocumentStore::new();
        assert!(store.set("x", json!([1, 2]), None).is_err());
        assert!(store.set("x", json!("scalar"), None).is_err());
    }

    #[test]
    fn dot_paths_descend_nested_objects() {
        let store = seeded();
        let hits = store.query(
            &[Predicate {
                field: "merchant.name".into(),
                op: Operator::Eq,
                value: json!("acme"),
            }],
            10,
            0,
        );
        assert_eq!(ids(hits), vec!["tx-1", "tx-3"]);
    }

    #[test]
    fn multi_predicate_intersection_prunes() {
        let store = seeded();
        let hits = store.query(
            &[
                Predicate {
                    field: "amount".into(),
                    op: Operator::Le,
                    value: json!(500),
                },
                Predicate {
                    field: "tags".into(),
                    op: Operator::Contains,
                    value: json!("card"),
                },
            ],
            10,
            0,
        );
        assert_eq!(ids(hits), vec!["tx-1"]);
    }

    #[test]
    fn equality_uses_index_when_present() {
        let mut store = seeded();
        store.create_index("merchant.mcc");
        assert!(store.indexed_fields().contains(&"merchant.mcc".to_string()));
        let hits = store.query(
            &[Predicate {
                field: "merchant.mcc".into(),
                op: Operator::Eq,
                value: json!("5411"),
            }],
            10,
            0,
        );
        assert_eq!(ids(hits), vec!["tx-1", "tx-3"]);

        // Index stays correct across replace and delete.
        store
            .set("tx-1", json!({"merchant": {"mcc": "6011"}}), None)
            .unwrap();
        store.delete("tx-3");
        let hits = store.query(
            &[Predicate {
                field: "merchant.mcc".into(),
                op: Operator::Eq,
                value: json!("5411"),
            }],
            10,
            0,
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn string_operators() {
        let store = seeded();
        let starts = store.query(
            &[Predicate {
                field: "merchant.name".into(),
                op: Operator::StartsWith,
                value: json!("ac"),
            }],
            10,
            0,
        );
        assert_eq!(ids(starts), vec!["tx-1", "tx-3"]);
        let ends = store.query(
            &[Predicate {
                field: "merchant.name".into(),
                op: Operator::EndsWith,
                value: json!("ith"),
            }],
            10,
            0,
        );
        assert_eq!(ids(ends), vec!["tx-2"]);
    }

    #[test]
    fn limit_and_offset_paginate_sorted_ids() {
        let store = seeded();
        let page1 = store.query(&[], 2, 0);
        let page2 = store.query(&[], 2, 2);
        assert_eq!(ids(page1), vec!["tx-1", "tx-2"]);
        assert_eq!(ids(page2), vec!["tx-3"]);
    }

    #[test]
    fn expired_documents_are_invisible() {
        let mut store = DocumentStore::new();
        store
            .set("gone", json!({"x": 1}), Some(Duration::milliseconds(-1)))
            .unwrap();
        store.set("live", json!({"x": 1}), None).unwrap();
        assert!(store.get("gone").is_none());
        assert_eq!(
            ids(store.query(
                &[Predicate {
                    field: "x".into(),
                    op: Operator::Eq,
                    value: json!(1)
                }],
                10,
                0
            )),
            vec!["live"]
        );
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn numeric_comparison_coerces_int_and_float() {
        let store = seeded();
        let hits = store.query(
            &[Predicate {
                field: "amount".into(),
                op: Operator::Eq,
                value: json!(125),
            }],
            10,
            0,
        );
        assert_eq!(ids(hits), vec!["tx-1", "tx-3"]);
    }
}
