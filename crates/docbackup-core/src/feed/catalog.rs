//! Partition range discovery

use crate::error::Result;
use crate::store::{Collection, DocumentStore, PartitionRange};
use tracing::trace;

/// Discovers the partition ranges of one collection
pub struct RangeCatalog<'a> {
    store: &'a dyn DocumentStore,
    collection: &'a Collection,
}

impl<'a> RangeCatalog<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: &'a Collection) -> Self {
        Self { store, collection }
    }

    /// Page through the range listing until exhausted.
    ///
    /// Always returns a full snapshot in listing order.
    pub async fn read_all(&self) -> Result<Vec<PartitionRange>> {
        let mut ranges = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .store
                .read_range_page(self.collection, cursor.as_deref())
                .await?;
            trace!(
                "Range listing page for {} returned {} ranges",
                self.collection,
                page.ranges.len()
            );
            ranges.extend(page.ranges);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(ranges)
    }
}
