//! Document-store capability for the document-flavored relation merges.

use async_trait::async_trait;

use crate::error::OrmResult;
use crate::shape::RowData;

/// Minimal find/findOne surface over a document collection. The filter is
/// a column→value mapping; an array value matches any of its elements.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &RowData,
        projection: &[String],
        sort: &RowData,
    ) -> OrmResult<Vec<RowData>>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &RowData,
        projection: &[String],
    ) -> OrmResult<Option<RowData>>;
}
