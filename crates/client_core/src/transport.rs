//! Thin request helpers over the REST and function surfaces.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::protocol::Table;
use tracing::debug;

use crate::{config::BackendConfig, error::BackendError};

pub(crate) type Filters<'a> = [(&'a str, String)];

pub(crate) fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

pub(crate) async fn ensure_success(res: Response) -> Result<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    Err(BackendError::from_response(res).await.into())
}

/// Request builder bound to one access token.
pub(crate) struct Rest<'a> {
    pub http: &'a Client,
    pub config: &'a BackendConfig,
    pub token: &'a str,
}

impl Rest<'_> {
    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.token)
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: Table,
        query: &Filters<'_>,
    ) -> Result<Vec<T>> {
        debug!(table = table.as_str(), "rest select");
        let res = self
            .request(Method::GET, self.config.rest_url(table.as_str()))
            .query(&[("select", "*")])
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", table.as_str()))?;
        let rows = ensure_success(res).await?.json().await?;
        Ok(rows)
    }

    pub async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: Table,
        body: &B,
    ) -> Result<T> {
        debug!(table = table.as_str(), "rest insert");
        let res = self
            .request(Method::POST, self.config.rest_url(table.as_str()))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to insert into {}", table.as_str()))?;
        let mut rows: Vec<T> = ensure_success(res).await?.json().await?;
        if rows.is_empty() {
            return Err(anyhow!(
                "insert into {} returned no representation",
                table.as_str()
            ));
        }
        Ok(rows.swap_remove(0))
    }

    pub async fn update<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: Table,
        filters: &Filters<'_>,
        body: &B,
    ) -> Result<Vec<T>> {
        debug!(table = table.as_str(), "rest update");
        let res = self
            .request(Method::PATCH, self.config.rest_url(table.as_str()))
            .header("Prefer", "return=representation")
            .query(filters)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to update {}", table.as_str()))?;
        let rows = ensure_success(res).await?.json().await?;
        Ok(rows)
    }

    pub async fn delete(&self, table: Table, filters: &Filters<'_>) -> Result<()> {
        if filters.is_empty() {
            return Err(anyhow!("refusing unfiltered delete on {}", table.as_str()));
        }
        debug!(table = table.as_str(), "rest delete");
        let res = self
            .request(Method::DELETE, self.config.rest_url(table.as_str()))
            .query(filters)
            .send()
            .await
            .with_context(|| format!("failed to delete from {}", table.as_str()))?;
        ensure_success(res).await?;
        Ok(())
    }

    pub async fn invoke<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        name: &str,
        body: &B,
    ) -> Result<T> {
        debug!(function = name, "invoking remote procedure");
        let res = self
            .request(Method::POST, self.config.function_url(name))
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to invoke {name}"))?;
        let res = ensure_success(res).await?;
        let text = res.text().await?;
        // Some procedures answer 204 or an empty body.
        let text = if text.trim().is_empty() {
            "{}"
        } else {
            text.as_str()
        };
        serde_json::from_str(text).with_context(|| format!("unexpected response from {name}"))
    }
}
