use anyhow::Context;
use momentum_engine::collaborators::{
    LedgerClient,
    LedgerError,
    TradeReceipt,
};
use reqwest::{
    Method,
    RequestBuilder,
    Response,
    StatusCode,
    header::RETRY_AFTER,
};
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct BalanceDto {
    amount: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Serialize)]
struct SwapRequest {
    side: Side,
}

struct Endpoint {
    base: Url,
    api_key: String,
}

/// Talks to the swap executor, which owns the wallet and builds the actual
/// transactions. Without a URL and key every call fails as misconfigured.
pub struct HttpLedgerClient {
    http: reqwest::Client,
    endpoint: Option<Endpoint>,
}

impl HttpLedgerClient {
    pub fn new(base_url: Option<Url>, api_key: Option<String>) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build ledger HTTP client")?;
        let endpoint = match (base_url, api_key) {
            (Some(mut base), Some(api_key)) if !api_key.is_empty() => {
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                Some(Endpoint { base, api_key })
            }
            _ => {
                tracing::warn!(
                    "ledger URL or API key missing; balances read as zero and trades fail"
                );
                None
            }
        };
        Ok(Self { http, endpoint })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, LedgerError> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            LedgerError::Configuration("ledger URL or API key is not set".to_string())
        })?;
        let url = endpoint
            .base
            .join(path)
            .map_err(|err| LedgerError::Configuration(err.to_string()))?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(&endpoint.api_key))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, LedgerError> {
        let response = request.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(|err| {
            LedgerError::Rejected(format!("unreadable ledger response: {}", err.without_url()))
        })
    }

    async fn balance(&self, path: &str) -> Result<u64, LedgerError> {
        let request = self.request(Method::GET, path)?;
        let balance: BalanceDto = self.fetch(request).await?;
        debug!(path, amount = balance.amount, "balance read");
        Ok(balance.amount)
    }

    async fn swap(&self, side: Side) -> Result<TradeReceipt, LedgerError> {
        let request = self
            .request(Method::POST, "swaps")?
            .json(&SwapRequest { side });
        let receipt: TradeReceipt = self.fetch(request).await?;
        debug!(?side, reference = %receipt.reference, "swap executed");
        Ok(receipt)
    }
}

fn transport_error(err: reqwest::Error) -> LedgerError {
    LedgerError::Network(err.without_url().to_string())
}

async fn check_status(response: Response) -> Result<Response, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let detail = response.text().await.unwrap_or_default();
    let detail = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {detail}")
    };
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => LedgerError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LedgerError::Configuration(detail),
        status if status.is_server_error() => LedgerError::Network(detail),
        _ => LedgerError::Rejected(detail),
    })
}

impl LedgerClient for HttpLedgerClient {
    async fn reserve_balance(&self) -> Result<u64, LedgerError> {
        self.balance("balances/reserve").await
    }

    async fn demand_balance(&self) -> Result<u64, LedgerError> {
        self.balance("balances/demand").await
    }

    async fn buy(&self) -> Result<TradeReceipt, LedgerError> {
        self.swap(Side::Buy).await
    }

    async fn sell(&self) -> Result<TradeReceipt, LedgerError> {
        self.swap(Side::Sell).await
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fake_http::{
        FakeHttpServer,
        ScriptedResponse,
    };
    use serde_json::json;

    fn client(server: &FakeHttpServer) -> HttpLedgerClient {
        let base = Url::parse(&format!("{}/api", server.base_url())).unwrap();
        HttpLedgerClient::new(Some(base), Some("key-1".to_string())).unwrap()
    }

    #[tokio::test]
    async fn reserve_balance__authorized_request__returns_amount() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            "/api/balances/reserve",
            ScriptedResponse::ok(json!({ "amount": 2_000_000_000u64 })),
        );
        let ledger = client(&server);

        // when
        let balance = ledger.reserve_balance().await;

        // then
        assert_eq!(balance, Ok(2_000_000_000));
        let requests = server.requests_to("/api/balances/reserve");
        assert_eq!(requests[0].method, "GET");
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer key-1")
        );
    }

    #[tokio::test]
    async fn demand_balance__reads_demand_endpoint() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            "/api/balances/demand",
            ScriptedResponse::ok(json!({ "amount": 5 })),
        );
        let ledger = client(&server);

        // when
        let balance = ledger.demand_balance().await;

        // then
        assert_eq!(balance, Ok(5));
    }

    #[tokio::test]
    async fn sell__posts_side_and_returns_receipt() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            "/api/swaps",
            ScriptedResponse::ok(json!({ "reference": "tx-9", "summary": "sold 1 TONDEV" })),
        );
        let ledger = client(&server);

        // when
        let receipt = ledger.sell().await;

        // then
        assert_eq!(
            receipt,
            Ok(TradeReceipt {
                reference: "tx-9".to_string(),
                summary: "sold 1 TONDEV".to_string(),
            })
        );
        let requests = server.requests_to("/api/swaps");
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].body, json!({ "side": "sell" }));
    }

    #[tokio::test]
    async fn buy__too_many_requests__reports_retry_after() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            "/api/swaps",
            ScriptedResponse::status(429, json!({ "error": "slow down" })).with_retry_after(3),
        );
        let ledger = client(&server);

        // when
        let receipt = ledger.buy().await;

        // then
        assert_eq!(
            receipt,
            Err(LedgerError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            })
        );
    }

    #[tokio::test]
    async fn reserve_balance__status_codes__map_to_error_classes() {
        // given
        let server = FakeHttpServer::start().await;
        let path = "/api/balances/reserve";
        server.respond(path, ScriptedResponse::status(503, json!({})));
        server.respond(path, ScriptedResponse::status(401, json!({})));
        server.respond(path, ScriptedResponse::status(400, json!({})));
        let ledger = client(&server);

        // when
        let unavailable = ledger.reserve_balance().await;
        let unauthorized = ledger.reserve_balance().await;
        let bad_request = ledger.reserve_balance().await;

        // then
        assert!(matches!(unavailable, Err(LedgerError::Network(_))));
        assert!(matches!(unauthorized, Err(LedgerError::Configuration(_))));
        assert!(matches!(bad_request, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn buy__missing_api_key__is_configuration_error() {
        // given
        let server = FakeHttpServer::start().await;
        let base = Url::parse(server.base_url()).unwrap();
        let ledger = HttpLedgerClient::new(Some(base), None).unwrap();

        // when
        let receipt = ledger.buy().await;

        // then
        assert!(!ledger.is_configured());
        assert!(matches!(receipt, Err(LedgerError::Configuration(_))));
        assert!(server.requests().is_empty());
    }
}
