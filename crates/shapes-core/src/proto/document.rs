//! Messages and stubs for the `document.Documents` service.
//!
//! `Document.id` is empty on create requests and always set on responses.

tonic::include_proto!("document");
include!(concat!(env!("OUT_DIR"), "/document.Documents.rs"));
