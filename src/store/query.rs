use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::store::Entity;

/// A comparable column value exposed by an entity for filtering and ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FieldValue {
    fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Null, _) => Ordering::Less,
            (_, FieldValue::Null) => Ordering::Greater,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            // Mixed kinds never happen for a well-formed field; keep the sort total anyway.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) => 2,
            FieldValue::Text(_) => 3,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&String> for FieldValue {
    fn from(v: &String) -> Self {
        FieldValue::Text(v.clone())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Eq(String, FieldValue),
    In(String, Vec<FieldValue>),
    /// Field is less than or equal to the value. Null never matches.
    Le(String, FieldValue),
}

impl Condition {
    fn matches<E: Entity>(&self, entity: &E) -> bool {
        match self {
            Condition::Eq(field, value) => entity.field(field).as_ref() == Some(value),
            Condition::In(field, values) => entity
                .field(field)
                .map(|v| values.contains(&v))
                .unwrap_or(false),
            Condition::Le(field, value) => match entity.field(field) {
                None | Some(FieldValue::Null) => false,
                Some(v) => v.compare(value) != Ordering::Greater,
            },
        }
    }
}

/// Conjunction of conditions over entity fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_in<V: Into<FieldValue>>(mut self, field: &str, values: Vec<V>) -> Self {
        self.conditions.push(Condition::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn le(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.conditions
            .push(Condition::Le(field.to_string(), value.into()));
        self
    }

    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.conditions.iter().all(|c| c.matches(entity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Filter, ordering and pagination for a list query. The same value is accepted by live and
/// archived repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub filter: Filter,
    pub order: Vec<OrderBy>,
    pub offset: usize,
    pub limit: usize,
}

impl QueryOptions {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            filter: Filter::default(),
            order: Vec::new(),
            offset,
            limit,
        }
    }

    /// Every row, in id order.
    pub fn all() -> Self {
        Self::new(0, usize::MAX)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    /// Applies the options to an unordered row set. Ties are broken by id ascending so that
    /// pagination is deterministic.
    pub fn apply<E: Entity>(&self, rows: impl IntoIterator<Item = E>) -> Vec<E> {
        let mut rows: Vec<E> = rows.into_iter().filter(|e| self.filter.matches(e)).collect();
        rows.sort_by(|a, b| {
            for order in &self.order {
                let left = a.field(&order.field).unwrap_or(FieldValue::Null);
                let right = b.field(&order.field).unwrap_or(FieldValue::Null);
                let ord = match order.direction {
                    Direction::Asc => left.compare(&right),
                    Direction::Desc => right.compare(&left),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id().cmp(&b.id())
        });
        rows.into_iter().skip(self.offset).take(self.limit).collect()
    }
}
