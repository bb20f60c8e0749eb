use std::fmt;

use crate::error::{RequestError, Result};

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    db: String,
    collection: String,
}

impl Namespace {
    /// Build a namespace from its parts, rejecting empty or dotted database names.
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let db = db.into();
        let collection = collection.into();

        if db.is_empty() || db.contains('.') {
            return Err(RequestError::BadValue(format!("Invalid database name: '{db}'")).into());
        }
        if collection.is_empty() {
            return Err(RequestError::BadValue("Collection name cannot be empty".into()).into());
        }

        Ok(Self { db, collection })
    }

    /// Parse a full `db.coll` string. The collection part may contain dots.
    pub fn parse(full: &str) -> Result<Self> {
        match full.split_once('.') {
            Some((db, coll)) => Self::new(db, coll),
            None => Err(RequestError::BadValue(format!("Invalid namespace: '{full}'")).into()),
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db, self.collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}
