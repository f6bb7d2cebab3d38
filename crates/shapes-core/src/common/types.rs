//! # Document Types
//!
//! This module defines the domain types for the document service and their
//! conversions to and from the wire messages in
//! [`proto::document`](crate::proto::document).
//!
//! ## Overview
//!
//! - [`DocumentId`] - the store-assigned identity of a document. It is a
//!   time-ordered UUID (v7), so identifiers sort roughly by creation time,
//!   the same property the store's native key format has.
//! - [`DocumentFields`] - everything about a document except its identity.
//!   This is what callers write; updates replace it wholesale.
//! - [`StoredDocument`] - identity plus fields, as read back from a store.
//!
//! ## Identity contract
//!
//! An identifier that does not parse as a [`DocumentId`] is always rejected
//! before a store is touched, so malformed identifiers can never mutate store
//! state. An identifier that parses but is absent from the store is a
//! different failure (`NotFound`).

use crate::{Error, Result, proto::document::Document};
use core::{fmt, str::FromStr};
use uuid::Uuid;

/// Store-assigned identity of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Mints a fresh, time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses the textual form of an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `raw` is not a valid identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| Error::invalid_argument(format!("Invalid document id {raw:?}: {e}")))
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DocumentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// The caller-owned part of a document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentFields {
    pub author_id: String,
    pub title: String,
    pub content: String,
}

/// A document together with the identity the store gave it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub fields: DocumentFields,
}

impl StoredDocument {
    #[must_use]
    pub const fn new(id: DocumentId, fields: DocumentFields) -> Self {
        Self { id, fields }
    }
}

impl From<Document> for DocumentFields {
    fn from(doc: Document) -> Self {
        Self {
            author_id: doc.author_id,
            title: doc.title,
            content: doc.content,
        }
    }
}

impl From<StoredDocument> for Document {
    fn from(doc: StoredDocument) -> Self {
        Self {
            id: doc.id.to_string(),
            author_id: doc.fields.author_id,
            title: doc.fields.title,
            content: doc.fields.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn display_round_trips_through_parse() {
        let id = DocumentId::generate();
        let parsed = DocumentId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_ids_are_invalid_arguments() {
        for raw in ["", "abc", "not-a-uuid-at-all", "5f1e0b0c2b0c8e0c2b0c8e0c"] {
            let err = DocumentId::parse(raw).unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{raw:?}");
        }
    }

    #[test]
    fn wire_conversion_keeps_every_field() {
        let id = DocumentId::generate();
        let fields = DocumentFields {
            author_id: "peter".into(),
            title: "first post".into(),
            content: "hello".into(),
        };

        let wire = Document::from(StoredDocument::new(id, fields.clone()));
        assert_eq!(wire.id, id.to_string());
        assert_eq!(DocumentFields::from(wire), fields);
    }
}
