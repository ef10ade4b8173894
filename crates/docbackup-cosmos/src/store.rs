//! Store trait implementations over the REST API

use crate::client::{continuation, error_response, header_value, CosmosClient, Resource};
use async_trait::async_trait;
use docbackup_core::store::{
    ChangePage, Collection, CollectionSpec, Database, Document, DocumentPage, DocumentStore,
    DocumentWriter, PartitionRange, RangePage, StartPolicy,
};
use docbackup_core::{BackupError, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

#[derive(Deserialize)]
struct DatabaseList {
    #[serde(rename = "Databases", default)]
    databases: Vec<ResourceId>,
}

#[derive(Deserialize)]
struct CollectionList {
    #[serde(rename = "DocumentCollections", default)]
    collections: Vec<ResourceId>,
}

#[derive(Deserialize)]
struct RangeList {
    #[serde(rename = "PartitionKeyRanges", default)]
    ranges: Vec<WireRange>,
}

#[derive(Deserialize)]
struct DocumentList {
    #[serde(rename = "Documents", default)]
    documents: Vec<Document>,
}

#[derive(Deserialize)]
struct ResourceId {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRange {
    id: String,
    #[serde(default)]
    min_inclusive: Option<String>,
    #[serde(default)]
    max_exclusive: Option<String>,
}

impl From<WireRange> for PartitionRange {
    fn from(range: WireRange) -> Self {
        PartitionRange {
            id: range.id,
            min_inclusive: range.min_inclusive,
            max_exclusive: range.max_exclusive,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCollection<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_key: Option<PartitionKeyDefinition<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_ttl: Option<i64>,
}

#[derive(Serialize)]
struct PartitionKeyDefinition<'a> {
    paths: [&'a str; 1],
    kind: &'static str,
}

#[derive(Serialize)]
struct CreateDatabase<'a> {
    id: &'a str,
}

impl CosmosClient {
    fn paged(&self, request: RequestBuilder, cursor: Option<&str>) -> RequestBuilder {
        let request = request.header("x-ms-max-item-count", self.page_size().to_string());
        match cursor {
            Some(cursor) => request.header("x-ms-continuation", cursor),
            None => request,
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let resource = Resource {
            path: "dbs".to_string(),
            resource_type: "dbs",
            link: String::new(),
        };

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let request = self.paged(self.request(Method::GET, &resource)?, cursor.as_deref());
            let (page, headers): (DatabaseList, _) = self.send_json(request).await?;
            ids.extend(page.databases.into_iter().map(|d| d.id));
            match continuation(&headers) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    /// Create a resource, treating `409 Conflict` as success
    async fn create(&self, request: RequestBuilder) -> Result<bool> {
        let response = self.send(request).await?;
        if response.status().is_success() {
            return Ok(true);
        }
        match error_response(response).await {
            err if err.is_conflict() => Ok(false),
            err => Err(err),
        }
    }
}

/// `If-None-Match` value of a change feed read. `None` reads from the beginning.
fn change_precondition(continuation: Option<&str>, start: StartPolicy) -> Option<&str> {
    match (continuation, start) {
        (Some(token), _) => Some(token),
        (None, StartPolicy::FromNow) => Some("*"),
        (None, StartPolicy::FromBeginning) => None,
    }
}

/// `304 Not Modified`: nothing new, but the etag still moves the cursor
fn unchanged_page(etag: Option<String>) -> ChangePage {
    ChangePage {
        records: Vec::new(),
        continuation: etag,
        has_more: false,
    }
}

/// A page with content may be followed by more, keep reading until a 304
fn changed_page(records: Vec<Document>, etag: Option<String>) -> ChangePage {
    ChangePage {
        records,
        continuation: etag,
        has_more: true,
    }
}

fn throughput_header(request: RequestBuilder, throughput: Option<u32>) -> RequestBuilder {
    match throughput {
        Some(ru) => request.header("x-ms-offer-throughput", ru.to_string()),
        None => request,
    }
}

#[async_trait]
impl DocumentStore for CosmosClient {
    async fn find_database(&self, name: &str) -> Result<Option<Database>> {
        let wanted = name.to_lowercase();
        Ok(self
            .list_databases()
            .await?
            .into_iter()
            .find(|id| id.to_lowercase() == wanted)
            .map(Database::new))
    }

    async fn list_collections(&self, database: &Database) -> Result<Vec<Collection>> {
        let resource = Resource {
            path: format!("{}/colls", database.link()),
            resource_type: "colls",
            link: database.link(),
        };

        let mut collections = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let request = self.paged(self.request(Method::GET, &resource)?, cursor.as_deref());
            let (page, headers): (CollectionList, _) = self.send_json(request).await?;
            collections.extend(
                page.collections
                    .into_iter()
                    .map(|c| Collection::new(database.id.clone(), c.id)),
            );
            match continuation(&headers) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(collections)
    }

    async fn read_range_page(
        &self,
        collection: &Collection,
        cursor: Option<&str>,
    ) -> Result<RangePage> {
        let resource = Resource {
            path: format!("{}/pkranges", collection.link()),
            resource_type: "pkranges",
            link: collection.link(),
        };
        let request = self.paged(self.request(Method::GET, &resource)?, cursor);
        let (page, headers): (RangeList, _) = self.send_json(request).await?;

        Ok(RangePage {
            ranges: page.ranges.into_iter().map(PartitionRange::from).collect(),
            next_cursor: continuation(&headers),
        })
    }

    async fn read_change_page(
        &self,
        collection: &Collection,
        range_id: &str,
        continuation: Option<&str>,
        start: StartPolicy,
    ) -> Result<ChangePage> {
        let resource = Resource {
            path: format!("{}/docs", collection.link()),
            resource_type: "docs",
            link: collection.link(),
        };

        let mut request = self
            .request(Method::GET, &resource)?
            .header("a-im", "Incremental feed")
            .header("x-ms-documentdb-partitionkeyrangeid", range_id)
            .header("x-ms-max-item-count", self.page_size().to_string());
        if let Some(precondition) = change_precondition(continuation, start) {
            request = request.header("if-none-match", precondition);
        }

        let response = self.send(request).await?;
        let status = response.status();
        let next = header_value(response.headers(), "etag");

        if status == StatusCode::NOT_MODIFIED {
            trace!("No changes for {} range {}", collection, range_id);
            return Ok(unchanged_page(next));
        }
        if !status.is_success() {
            return Err(error_response(response).await);
        }

        let page: DocumentList = response.json().await.map_err(|e| {
            BackupError::serialization(format!("failed to parse change feed page: {}", e))
        })?;
        debug!(
            "Change feed page for {} range {} returned {} documents",
            collection,
            range_id,
            page.documents.len()
        );

        Ok(changed_page(page.documents, next))
    }

    async fn read_document_page(
        &self,
        collection: &Collection,
        cursor: Option<&str>,
    ) -> Result<DocumentPage> {
        let resource = Resource {
            path: format!("{}/docs", collection.link()),
            resource_type: "docs",
            link: collection.link(),
        };
        let request = self.paged(self.request(Method::GET, &resource)?, cursor);
        let (page, headers): (DocumentList, _) = self.send_json(request).await?;

        Ok(DocumentPage {
            documents: page.documents,
            next_cursor: continuation(&headers),
        })
    }
}

#[async_trait]
impl DocumentWriter for CosmosClient {
    async fn create_database_if_not_exists(
        &self,
        name: &str,
        throughput: Option<u32>,
    ) -> Result<Database> {
        if let Some(existing) = self.find_database(name).await? {
            return Ok(existing);
        }

        let resource = Resource {
            path: "dbs".to_string(),
            resource_type: "dbs",
            link: String::new(),
        };
        let request = self
            .request(Method::POST, &resource)?
            .json(&CreateDatabase { id: name });
        if self.create(throughput_header(request, throughput)).await? {
            debug!("Created database {}", name);
        }
        Ok(Database::new(name))
    }

    async fn create_collection_if_not_exists(
        &self,
        database: &Database,
        spec: &CollectionSpec,
    ) -> Result<Collection> {
        let resource = Resource {
            path: format!("{}/colls", database.link()),
            resource_type: "colls",
            link: database.link(),
        };
        let body = CreateCollection {
            id: &spec.id,
            partition_key: spec
                .partition_key_path
                .as_deref()
                .map(|path| PartitionKeyDefinition {
                    paths: [path],
                    kind: "Hash",
                }),
            default_ttl: spec.default_ttl,
        };
        let request = self.request(Method::POST, &resource)?.json(&body);
        if self.create(throughput_header(request, spec.throughput)).await? {
            debug!("Created collection {} in {}", spec.id, database.id);
        }
        Ok(Collection::new(database.id.clone(), spec.id.clone()))
    }

    async fn upsert_document(
        &self,
        collection: &Collection,
        document: &Document,
        partition_key: Option<&Value>,
    ) -> Result<()> {
        let resource = Resource {
            path: format!("{}/docs", collection.link()),
            resource_type: "docs",
            link: collection.link(),
        };
        let mut request = self
            .request(Method::POST, &resource)?
            .header("x-ms-documentdb-is-upsert", "True")
            .json(document);
        if let Some(value) = partition_key {
            request = request.header(
                "x-ms-documentdb-partitionkey",
                serde_json::to_string(&[value])?,
            );
        }

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_response(response).await);
        }
        Ok(())
    }
}
