use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};

use crate::{
    config::SupabaseConfig,
    domain::{DomainRecord, NewDomainRecord, RecordId},
};

use super::{id_list, RecordStore, RemoteError};

/// Ids per `id=in.(..)` filter; keeps request lines well under gateway limits.
const ID_CHUNK: usize = 100;

/// PostgREST access to the domains table.
#[derive(Clone)]
pub struct RestRecordStore {
    http: Client,
    endpoint: String,
    anon_key: String,
    schema: String,
}

impl RestRecordStore {
    pub fn new(http: Client, config: &SupabaseConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/rest/v1/{}", config.url, config.table),
            anon_key: config.anon_key.clone(),
            schema: config.schema.clone(),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema)
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn insert(&self, domain: &str) -> Result<DomainRecord, RemoteError> {
        let response = self
            .authorized(self.http.post(&self.endpoint))
            .header("Prefer", "return=representation")
            .json(&[NewDomainRecord::pending(domain)])
            .send()
            .await?;
        let rows: Vec<DomainRecord> = expect_success(response, "insert").await?.json().await?;
        let record = rows
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::EmptyInsert(domain.to_string()))?;
        tracing::debug!(target: "store", id = %record.id, domain, "pending record created");
        Ok(record)
    }

    async fn fetch_by_ids(&self, ids: &[RecordId]) -> Result<Vec<DomainRecord>, RemoteError> {
        let mut rows = Vec::with_capacity(ids.len());
        for filter in id_filters(ids) {
            let response = self
                .authorized(self.http.get(&self.endpoint))
                .query(&[("select", "*".to_string()), ("id", filter)])
                .send()
                .await?;
            let chunk: Vec<DomainRecord> =
                expect_success(response, "select").await?.json().await?;
            rows.extend(chunk);
        }
        Ok(rows)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<DomainRecord>, RemoteError> {
        let response = self
            .authorized(self.http.get(&self.endpoint))
            .query(&[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let rows = expect_success(response, "list").await?.json().await?;
        Ok(rows)
    }

    async fn delete_by_ids(&self, ids: &[RecordId]) -> Result<(), RemoteError> {
        if ids.is_empty() {
            return Ok(());
        }
        for filter in id_filters(ids) {
            let response = self
                .authorized(self.http.delete(&self.endpoint))
                .query(&[("id", filter)])
                .send()
                .await?;
            expect_success(response, "delete").await?;
        }
        tracing::info!(target: "store", count = ids.len(), "records deleted");
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), RemoteError> {
        // PostgREST refuses unfiltered deletes.
        let response = self
            .authorized(self.http.delete(&self.endpoint))
            .query(&[("id", "not.is.null")])
            .send()
            .await?;
        expect_success(response, "delete").await?;
        tracing::info!(target: "store", "all records deleted");
        Ok(())
    }
}

async fn expect_success(response: Response, operation: &'static str) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(target: "store", operation, %status, body = %body, "store request rejected");
    Err(RemoteError::Status {
        operation,
        status,
        body,
    })
}

/// One `in.(..)` filter per chunk of at most [`ID_CHUNK`] ids, in input order.
fn id_filters(ids: &[RecordId]) -> impl Iterator<Item = String> + '_ {
    ids.chunks(ID_CHUNK)
        .map(|chunk| format!("in.({})", id_list(chunk)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_id_lists_are_split_into_chunks() {
        let ids: Vec<RecordId> = (1_000_000..1_000_250).map(RecordId::Int).collect();
        let filters: Vec<String> = id_filters(&ids).collect();
        assert_eq!(filters.len(), 3);
        assert!(filters[0].starts_with("in.(1000000,1000001,"));
        assert!(filters[2].ends_with(",1000249)"));

        let counts: Vec<usize> = filters
            .iter()
            .map(|f| f.matches(',').count() + 1)
            .collect();
        assert_eq!(counts, vec![100, 100, 50]);
        assert!(filters.iter().all(|f| f.len() < 1_000));
    }

    #[test]
    fn no_ids_means_no_requests() {
        assert_eq!(id_filters(&[]).count(), 0);
        let one = [RecordId::Text("ab".into())];
        assert_eq!(id_filters(&one).collect::<Vec<_>>(), vec!["in.(\"ab\")"]);
    }
}
