// src/subgraph.rs
//! Read-only client for the Superfluid subgraph backing the portfolio view.

use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::models::FlowRate;

const PORTFOLIO_QUERY: &str = r#"
query Portfolio($account: ID!) {
  account(id: $account) {
    id
    pools {
      id
      flowRate
      totalUnits
      token { id symbol }
    }
    poolMemberships {
      id
      units
      isConnected
      pool { id flowRate token { id symbol } }
    }
    outflows(orderBy: updatedAtTimestamp, orderDirection: desc) {
      id
      currentFlowRate
      createdAtTimestamp
      updatedAtTimestamp
      receiver { id }
      token { id symbol }
    }
  }
}
"#;

#[derive(Debug, Error)]
pub enum SubgraphError {
    #[error("subgraph request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subgraph returned HTTP {0}")]
    Status(StatusCode),
    #[error("subgraph query error: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub id: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub flow_rate: FlowRate,
    #[serde(default)]
    pub total_units: Option<String>,
    pub token: TokenRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMembership {
    pub id: String,
    pub units: String,
    pub is_connected: bool,
    pub pool: Pool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outflow {
    pub id: String,
    pub current_flow_rate: FlowRate,
    pub created_at_timestamp: String,
    pub updated_at_timestamp: String,
    pub receiver: AccountRef,
    pub token: TokenRef,
}

impl Outflow {
    pub fn is_open(&self) -> bool {
        self.current_flow_rate != FlowRate::ZERO
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at_timestamp)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.updated_at_timestamp)
    }
}

fn parse_timestamp(secs: &str) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs.parse().ok()?, 0)
}

/// Everything the portfolio view shows for one account. Empty when the
/// subgraph has never seen the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    #[serde(default)]
    pub pools: Vec<Pool>,
    #[serde(default)]
    pub pool_memberships: Vec<PoolMembership>,
    #[serde(default)]
    pub outflows: Vec<Outflow>,
}

impl Portfolio {
    pub fn open_streams(&self) -> impl Iterator<Item = &Outflow> {
        self.outflows.iter().filter(|o| o.is_open())
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PortfolioData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct PortfolioData {
    account: Option<Portfolio>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: Client,
    url: String,
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>) -> Result<Self, SubgraphError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, url: url.into() })
    }

    pub async fn portfolio(&self, account: Address) -> Result<Portfolio, SubgraphError> {
        // subgraph ids are lowercase hex
        let id = format!("0x{}", hex::encode(account));
        debug!("Querying portfolio for {} → {}", id, self.url);

        let resp = self
            .client
            .post(&self.url)
            .json(&json!({ "query": PORTFOLIO_QUERY, "variables": { "account": id } }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SubgraphError::Status(resp.status()));
        }

        let body: GraphQlResponse = resp.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(SubgraphError::Query(messages.join("; ")));
        }

        Ok(body.data.and_then(|d| d.account).unwrap_or_default())
    }

    /// Re-read an account's portfolio once the subgraph has had `delay` to
    /// pick up a transaction that was just mined.
    pub async fn refresh_after(&self, account: Address, delay: Duration) -> Result<Portfolio, SubgraphError> {
        debug!("Refreshing portfolio for {} in {:?}", account, delay);
        tokio::time::sleep(delay).await;
        self.portfolio(account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use axum::{routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    const SAMPLE: &str = r#"{
      "data": {
        "account": {
          "id": "0x00000000000000000000000000000000000000aa",
          "pools": [],
          "poolMemberships": [{
            "id": "m1",
            "units": "100",
            "isConnected": true,
            "pool": { "id": "0xp", "flowRate": "3858", "token": { "id": "0xt", "symbol": "BORINGx" } }
          }],
          "outflows": [
            {
              "id": "s1",
              "currentFlowRate": "115740740740740",
              "createdAtTimestamp": "1728000000",
              "updatedAtTimestamp": "1728003600",
              "receiver": { "id": "0xtorex" },
              "token": { "id": "0xcusdx", "symbol": "cUSDx" }
            },
            {
              "id": "s0",
              "currentFlowRate": "0",
              "createdAtTimestamp": "1727000000",
              "updatedAtTimestamp": "1727500000",
              "receiver": { "id": "0xtorex" },
              "token": { "id": "0xcusdx", "symbol": "cUSDx" }
            }
          ]
        }
      }
    }"#;

    async fn serve(body: &'static str) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(_req): Json<Value>| async move {
                Json(serde_json::from_str::<Value>(body).unwrap())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/", addr)
    }

    #[test]
    fn parses_portfolio_payload() {
        let body: GraphQlResponse = serde_json::from_str(SAMPLE).unwrap();
        let portfolio = body.data.unwrap().account.unwrap();

        assert_eq!(portfolio.pool_memberships.len(), 1);
        assert_eq!(portfolio.outflows.len(), 2);
        let open: Vec<&str> = portfolio.open_streams().map(|o| o.id.as_str()).collect();
        assert_eq!(open, vec!["s1"]);
        assert_eq!(portfolio.outflows[0].created_at().unwrap().timestamp(), 1_728_000_000);
    }

    #[tokio::test]
    async fn fetches_portfolio_over_http() {
        let url = serve(SAMPLE).await;
        let client = SubgraphClient::new(url).unwrap();

        let portfolio = client
            .portfolio(address!("00000000000000000000000000000000000000aa"))
            .await
            .unwrap();
        assert_eq!(portfolio.open_streams().count(), 1);
    }

    #[tokio::test]
    async fn refresh_waits_then_queries_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/",
            post({
                let hits = hits.clone();
                move |Json(_req): Json<Value>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::from_str::<Value>(SAMPLE).unwrap())
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = SubgraphClient::new(url).unwrap();
        let delay = Duration::from_millis(150);
        let started = Instant::now();
        let portfolio = client
            .refresh_after(address!("00000000000000000000000000000000000000aa"), delay)
            .await
            .unwrap();

        assert!(started.elapsed() >= delay);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let latest = portfolio.open_streams().next().unwrap();
        assert_eq!(latest.updated_at().unwrap().timestamp(), 1_728_003_600);
    }

    #[tokio::test]
    async fn unknown_account_is_empty() {
        let url = serve(r#"{ "data": { "account": null } }"#).await;
        let client = SubgraphClient::new(url).unwrap();

        let portfolio = client.portfolio(Address::ZERO).await.unwrap();
        assert_eq!(portfolio, Portfolio::default());
    }

    #[tokio::test]
    async fn graphql_errors_surface() {
        let url = serve(r#"{ "errors": [{ "message": "indexing_error" }] }"#).await;
        let client = SubgraphClient::new(url).unwrap();

        let err = client.portfolio(Address::ZERO).await.unwrap_err();
        assert!(matches!(err, SubgraphError::Query(m) if m == "indexing_error"));
    }
}
