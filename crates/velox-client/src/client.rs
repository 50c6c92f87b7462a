//! HTTP client for the Velox API.

use crate::error::Error;
use crate::types::*;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;


/// Header carrying API keys.
const API_KEY_HEADER: &str = "X-API-Key";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "http://localhost:8000").
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the Velox API.
///
/// Cloning is cheap; [`VeloxClient::with_token`] and
/// [`VeloxClient::with_api_key`] return authenticated copies.
#[derive(Debug, Clone)]
pub struct VeloxClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    api_key: Option<String>,
}

impl VeloxClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: None,
            api_key: None,
        })
    }

    /// Creates a new client with default configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str) -> Result<Self, Error> {
        Self::new(ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    /// Copy of this client that sends a bearer session token.
    #[must_use]
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..self.clone()
        }
    }

    /// Copy of this client that sends an API key.
    #[must_use]
    pub fn with_api_key(&self, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..self.clone()
        }
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Health & Stats
    // ========================================================================

    /// Performs a health check.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn health_check(&self) -> Result<HealthResponse, Error> {
        let resp = self.get("/health").send().await?;
        self.handle_response(resp).await
    }

    /// Gets platform statistics.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_stats(&self) -> Result<StatsResponse, Error> {
        let resp = self.get("/api/v1/stats").send().await?;
        self.handle_response(resp).await
    }

    /// Gets stream hub counters.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_stream_stats(&self) -> Result<StreamStats, Error> {
        let resp = self.get("/api/v1/ws/stats").send().await?;
        self.handle_response(resp).await
    }

    /// Lists open stream connections. Requires an admin account.
    ///
    /// # Errors
    /// Returns error if the request fails or the caller is not an admin.
    pub async fn list_stream_connections(&self) -> Result<Vec<StreamConnection>, Error> {
        let resp = self.get("/api/v1/ws/connections").send().await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Registers a user.
    ///
    /// # Errors
    /// Returns error if the request fails or the input is rejected.
    pub async fn register(&self, request: &RegisterRequest) -> Result<User, Error> {
        let resp = self
            .post("/api/v1/auth/register")
            .json(request)
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Logs in. Use [`VeloxClient::with_token`] with the returned token.
    ///
    /// # Errors
    /// Returns error if the credentials are rejected or the account is locked.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, Error> {
        let resp = self.post("/api/v1/auth/login").json(request).send().await?;
        self.handle_response(resp).await
    }

    /// Ends the current session.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn logout(&self) -> Result<MessageResponse, Error> {
        self.require_credentials()?;
        let resp = self.post("/api/v1/auth/logout").send().await?;
        self.handle_response(resp).await
    }

    /// Issues a new API key, replacing the previous one.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn generate_api_key(&self) -> Result<ApiKeyResponse, Error> {
        self.require_credentials()?;
        let resp = self.post("/api/v1/auth/api-key").send().await?;
        self.handle_response(resp).await
    }

    /// Gets the caller's profile.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_profile(&self) -> Result<User, Error> {
        self.require_credentials()?;
        let resp = self.get("/api/v1/users/me").send().await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    /// Creates a strategy in `draft` status.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn create_strategy(
        &self,
        request: &CreateStrategyRequest,
    ) -> Result<Strategy, Error> {
        self.require_credentials()?;
        let resp = self
            .post("/api/v1/strategies")
            .json(request)
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Lists the caller's strategies.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_strategies(&self) -> Result<Vec<Strategy>, Error> {
        self.require_credentials()?;
        let resp = self.get("/api/v1/strategies").send().await?;
        self.handle_response(resp).await
    }

    /// Gets a strategy.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_strategy(&self, id: Uuid) -> Result<Strategy, Error> {
        self.require_credentials()?;
        let resp = self
            .get(&format!("/api/v1/strategies/{id}"))
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Moves a strategy to another lifecycle status.
    ///
    /// # Errors
    /// Returns error if the transition is not allowed.
    pub async fn set_strategy_status(
        &self,
        id: Uuid,
        status: StrategyStatus,
    ) -> Result<Strategy, Error> {
        self.require_credentials()?;
        let resp = self
            .post(&format!("/api/v1/strategies/{id}/status"))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Trading
    // ========================================================================

    /// Places an order.
    ///
    /// # Errors
    /// Returns [`Error::Api`] with code `RISK_REJECTED` when a risk limit blocks it.
    pub async fn place_trade(&self, request: &PlaceTradeRequest) -> Result<Trade, Error> {
        self.require_credentials()?;
        let resp = self.post("/api/v1/trades").json(request).send().await?;
        self.handle_response(resp).await
    }

    /// Lists the caller's trades, newest first.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, Error> {
        self.require_credentials()?;
        let path = with_query("/api/v1/trades", filter)?;
        let resp = self.get(&path).send().await?;
        self.handle_response(resp).await
    }

    /// Lists the caller's positions.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_positions(&self) -> Result<Vec<Position>, Error> {
        self.require_credentials()?;
        let resp = self.get("/api/v1/positions").send().await?;
        self.handle_response(resp).await
    }

    /// Closes a position with an offsetting market order.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn close_position(&self, id: Uuid) -> Result<Trade, Error> {
        self.require_credentials()?;
        let resp = self
            .post(&format!("/api/v1/positions/{id}/close"))
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Sends an n8n trade signal for a strategy. Requires an API key.
    ///
    /// # Errors
    /// Returns error if the signal is rejected.
    pub async fn send_signal(
        &self,
        strategy_id: Uuid,
        signal: &SignalRequest,
    ) -> Result<Trade, Error> {
        if self.api_key.is_none() {
            return Err(Error::NotAuthenticated("API key required for webhooks"));
        }
        let resp = self
            .post(&format!("/api/v1/webhooks/n8n/{strategy_id}"))
            .json(signal)
            .send()
            .await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Market Data
    // ========================================================================

    /// Latest quote of a symbol.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, Error> {
        let resp = self
            .get(&format!("/api/v1/market-data/{symbol}/quote"))
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Recent ticks of a symbol, oldest first.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_ticks(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<Tick>, Error> {
        let mut path = format!("/api/v1/market-data/{symbol}/ticks");
        if let Some(limit) = limit {
            path.push_str(&format!("?limit={limit}"));
        }
        let resp = self.get(&path).send().await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Risk
    // ========================================================================

    /// Gets the caller's risk limits.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_risk_settings(&self) -> Result<RiskSettings, Error> {
        self.require_credentials()?;
        let resp = self.get("/api/v1/risk/settings").send().await?;
        self.handle_response(resp).await
    }

    /// Updates the caller's risk limits.
    ///
    /// # Errors
    /// Returns error if a limit is invalid.
    pub async fn update_risk_settings(
        &self,
        update: &UpdateRiskSettings,
    ) -> Result<RiskSettings, Error> {
        self.require_credentials()?;
        let resp = self
            .client
            .put(self.url("/api/v1/risk/settings"))
            .json(update);
        let resp = self.authorize(resp).send().await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // Option Chain
    // ========================================================================

    /// Gets the option chain of an underlying.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_option_chain(
        &self,
        underlying: &str,
        params: &ChainParams,
    ) -> Result<OptionChain, Error> {
        let path = with_query(&format!("/api/v1/option-chain/{underlying}"), params)?;
        let resp = self.get(&path).send().await?;
        self.handle_response(resp).await
    }

    /// Chain summary with support, resistance and max pain.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_chain_analysis(
        &self,
        underlying: &str,
        params: &ChainParams,
    ) -> Result<ChainAnalysis, Error> {
        let path = with_query(
            &format!("/api/v1/option-chain/{underlying}/analysis"),
            params,
        )?;
        let resp = self.get(&path).send().await?;
        self.handle_response(resp).await
    }

    /// Put-call ratio of an underlying.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_pcr(&self, underlying: &str, params: &ChainParams) -> Result<PcrResult, Error> {
        let path = with_query(&format!("/api/v1/option-chain/{underlying}/pcr"), params)?;
        let resp = self.get(&path).send().await?;
        self.handle_response(resp).await
    }

    /// Max pain strike of an underlying.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn get_max_pain(
        &self,
        underlying: &str,
        params: &ChainParams,
    ) -> Result<MaxPainResult, Error> {
        let path = with_query(
            &format!("/api/v1/option-chain/{underlying}/max-pain"),
            params,
        )?;
        let resp = self.get(&path).send().await?;
        self.handle_response(resp).await
    }

    // ========================================================================
    // WebSocket
    // ========================================================================

    /// WebSocket URL of the multiplexed stream.
    #[must_use]
    pub fn ws_stream_url(&self) -> String {
        let mut url = format!("{}/api/v1/ws/stream", self.ws_base());
        if let Some(token) = &self.token {
            url.push_str(&format!("?token={token}"));
        } else if let Some(key) = &self.api_key {
            url.push_str(&format!("?api_key={key}"));
        }
        url
    }

    /// WebSocket URL of the tick stream for `symbols`.
    #[must_use]
    pub fn ws_ticks_url(&self, symbols: &[&str]) -> String {
        let base = format!("{}/api/v1/ws/ticks", self.ws_base());
        if symbols.is_empty() {
            base
        } else {
            format!("{base}?symbols={}", symbols.join(","))
        }
    }

    fn ws_base(&self) -> String {
        self.base_url
            .replace("http://", "ws://")
            .replace("https://", "wss://")
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn require_credentials(&self) -> Result<(), Error> {
        if self.token.is_none() && self.api_key.is_none() {
            return Err(Error::NotAuthenticated("session token or API key required"));
        }
        Ok(())
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let text = resp.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.error),
            Err(_) => (String::new(), text),
        };
        match status.as_u16() {
            401 => Err(Error::Unauthorized(message)),
            404 => Err(Error::NotFound(message)),
            status => Err(Error::Api {
                status,
                code,
                message,
            }),
        }
    }
}

/// Appends the url-encoded `params` to `path`.
fn with_query<T: Serialize>(path: &str, params: &T) -> Result<String, Error> {
    let query = serde_urlencoded::to_string(params)?;
    if query.is_empty() {
        Ok(path.to_string())
    } else {
        Ok(format!("{path}?{query}"))
    }
}
