//! Thin PostgREST-style helpers shared by the domain, ledger and storage
//! adapters: typed select/insert/update/upsert over reqwest, plus raw object
//! upload. Filters are passed as query pairs, e.g. `("status", "eq.approved")`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::contract::StoreError;

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(%status, context, body = %body, "backend request failed");
        Err(format!("{context} failed with status {status}").into())
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .authed(self.http.get(self.table_url(table)).query(query))
            .send()
            .await?;
        let response = Self::check(response, table).await?;
        Ok(response.json().await?)
    }

    /// Insert one row and return its representation.
    pub async fn insert<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .authed(self.http.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let response = Self::check(response, table).await?;
        let mut rows: Vec<T> = response.json().await?;
        if rows.is_empty() {
            return Err(format!("insert into {table} returned no row").into());
        }
        Ok(rows.remove(0))
    }

    /// Insert rows without asking for a representation back.
    pub async fn insert_many<B: Serialize>(&self, table: &str, body: &B) -> Result<(), StoreError> {
        let response = self
            .authed(self.http.post(self.table_url(table)))
            .json(body)
            .send()
            .await?;
        Self::check(response, table).await?;
        Ok(())
    }

    pub async fn update<B: Serialize>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<(), StoreError> {
        let response = self
            .authed(self.http.patch(self.table_url(table)).query(query))
            .json(body)
            .send()
            .await?;
        Self::check(response, table).await?;
        Ok(())
    }

    /// Upsert with merge-duplicates semantics on the given conflict target.
    pub async fn upsert<B: Serialize>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> Result<(), StoreError> {
        let response = self
            .authed(
                self.http
                    .post(self.table_url(table))
                    .query(&[("on_conflict", on_conflict)]),
            )
            .header("Prefer", "resolution=merge-duplicates")
            .json(body)
            .send()
            .await?;
        Self::check(response, table).await?;
        Ok(())
    }

    /// Upload raw bytes to object storage; returns the stored path.
    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StoreError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .authed(self.http.post(url))
            .header("Content-Type", mime_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        Self::check(response, "object upload").await?;
        Ok(path.to_string())
    }
}
