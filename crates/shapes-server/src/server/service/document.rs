//! `document.Documents`: CRUD over a [`DocumentStore`].
//!
//! ## Error classification
//!
//! Every store outcome is translated here; the store's own errors never
//! reach the client verbatim.
//!
//! | Situation                                   | Status            |
//! |---------------------------------------------|-------------------|
//! | missing document / malformed id             | `InvalidArgument` |
//! | no document with a well-formed id           | `NotFound`        |
//! | store failure, undecodable key or record    | `Internal`        |
//! | update matched but modified nothing         | `Internal`        |
//! | delete removed more than one document       | `Internal`        |
//!
//! Ids are parsed before the store is touched, and mutations check the call
//! before they start, so a rejected call never changes the store.

use crate::server::{
    store::{DocumentStore, StoreError},
    streaming::{CallTracker, ResponseStream, producer::spawn_stream},
};
use futures::StreamExt;
use shapes_core::{
    Error,
    proto::document::{
        CreateDocumentRequest, CreateDocumentResponse, DeleteDocumentRequest,
        DeleteDocumentResponse, Document, ListDocumentsRequest, ListDocumentsResponse,
        ReadDocumentRequest, ReadDocumentResponse, UpdateDocumentRequest, UpdateDocumentResponse,
        documents_server::Documents,
    },
    types::{DocumentFields, DocumentId, StoredDocument},
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

#[derive(Clone)]
pub struct DocumentService {
    tracker: CallTracker,
    store: Arc<dyn DocumentStore>,
    stream_buffer_size: usize,
}

impl DocumentService {
    pub fn new(tracker: CallTracker, store: Arc<dyn DocumentStore>, stream_buffer_size: usize) -> Self {
        Self {
            tracker,
            store,
            stream_buffer_size,
        }
    }

    async fn create(&self, doc: Option<Document>) -> shapes_core::Result<Document> {
        let fields = DocumentFields::from(require(doc)?);

        let raw = self
            .store
            .insert(fields.clone())
            .await
            .map_err(|e| store_failure("Cannot create document", e))?;
        let id = DocumentId::parse(&raw)
            .map_err(|_| Error::internal(format!("Cannot convert {raw:?} to a document id")))?;

        Ok(StoredDocument::new(id, fields).into())
    }

    async fn read(&self, raw_id: &str) -> shapes_core::Result<Document> {
        let id = DocumentId::parse(raw_id)?;

        self.store
            .find_one(&id)
            .await
            .map_err(|e| store_failure("Cannot read document", e))?
            .map(Document::from)
            .ok_or_else(|| not_found(&id))
    }

    async fn update(&self, doc: Option<Document>) -> shapes_core::Result<Document> {
        let doc = require(doc)?;
        let id = DocumentId::parse(&doc.id)?;
        let fields = DocumentFields::from(doc);

        let outcome = self
            .store
            .replace(&id, fields.clone())
            .await
            .map_err(|e| store_failure("Cannot update document", e))?;

        if outcome.matched == 0 {
            return Err(not_found(&id));
        }
        if outcome.modified == 0 {
            return Err(Error::internal(format!("Document {id} matched but was not updated")));
        }

        Ok(StoredDocument::new(id, fields).into())
    }

    async fn delete(&self, raw_id: &str) -> shapes_core::Result<String> {
        let id = DocumentId::parse(raw_id)?;

        let deleted = self
            .store
            .delete(&id)
            .await
            .map_err(|e| store_failure("Cannot delete document", e))?;

        match deleted {
            0 => Err(not_found(&id)),
            1 => Ok(id.to_string()),
            n => Err(Error::internal(format!("Deleting {id} removed {n} documents"))),
        }
    }
}

fn require(doc: Option<Document>) -> shapes_core::Result<Document> {
    doc.ok_or_else(|| Error::invalid_argument("A document is required"))
}

fn not_found(id: &DocumentId) -> Error {
    Error::not_found(format!("Cannot find document with id {id}"))
}

fn store_failure(context: &str, err: StoreError) -> Error {
    Error::internal_with(format!("{context}: {err}"), err)
}

#[tonic::async_trait]
impl Documents for DocumentService {
    type ListDocumentsStream = ResponseStream<ListDocumentsResponse>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn create_document(
        &self,
        req: Request<CreateDocumentRequest>,
    ) -> Result<Response<CreateDocumentResponse>, Status> {
        let ctx = self.tracker.begin("CreateDocument", req.metadata())?;
        let doc = req.into_inner().document;

        let outcome = match ctx.check() {
            Ok(()) => self.create(doc).await,
            Err(e) => Err(e),
        };
        ctx.reply(outcome.map(|doc| CreateDocumentResponse {
            document: Some(doc),
        }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(id = %req.get_ref().document_id)))]
    async fn read_document(
        &self,
        req: Request<ReadDocumentRequest>,
    ) -> Result<Response<ReadDocumentResponse>, Status> {
        let ctx = self.tracker.begin("ReadDocument", req.metadata())?;
        let outcome = self.read(&req.get_ref().document_id).await;

        ctx.reply(outcome.map(|doc| ReadDocumentResponse {
            document: Some(doc),
        }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn update_document(
        &self,
        req: Request<UpdateDocumentRequest>,
    ) -> Result<Response<UpdateDocumentResponse>, Status> {
        let ctx = self.tracker.begin("UpdateDocument", req.metadata())?;
        let doc = req.into_inner().document;

        let outcome = match ctx.check() {
            Ok(()) => self.update(doc).await,
            Err(e) => Err(e),
        };
        ctx.reply(outcome.map(|doc| UpdateDocumentResponse {
            document: Some(doc),
        }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(id = %req.get_ref().document_id)))]
    async fn delete_document(
        &self,
        req: Request<DeleteDocumentRequest>,
    ) -> Result<Response<DeleteDocumentResponse>, Status> {
        let ctx = self.tracker.begin("DeleteDocument", req.metadata())?;
        let raw_id = req.into_inner().document_id;

        let outcome = match ctx.check() {
            Ok(()) => self.delete(&raw_id).await,
            Err(e) => Err(e),
        };
        ctx.reply(outcome.map(|document_id| DeleteDocumentResponse { document_id }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn list_documents(
        &self,
        req: Request<ListDocumentsRequest>,
    ) -> Result<Response<Self::ListDocumentsStream>, Status> {
        let ctx = self.tracker.begin("ListDocuments", req.metadata())?;
        let mut cursor = self.store.scan();

        let stream = spawn_stream(ctx, self.stream_buffer_size, move |out| async move {
            while let Some(item) = cursor.next().await {
                let doc = item.map_err(|e| store_failure("Cannot list documents", e))?;
                out.send(ListDocumentsResponse {
                    document: Some(doc.into()),
                })
                .await?;
            }
            Ok(())
        });

        Ok(Response::new(stream))
    }
}
