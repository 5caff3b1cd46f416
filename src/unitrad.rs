use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SearchError;
use crate::query::Query;

/// Server-side long-poll window requested on every `polling` call, seconds.
const POLL_WAIT_SECS: u32 = 10;

/// Opaque session token assigned by the remote service on `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub fn test(token: &str) -> Self {
        SessionToken(token.to_string())
    }
}

/// One library's report for one item inside a raw page.
#[derive(Debug, Clone)]
pub struct HoldingFragment {
    pub library_system: String,
    pub item_id: String,
    pub title: String,
    pub isbn: Option<String>,
    /// Raw wire status, decoded into the lattice by the aggregator.
    pub status: String,
}

/// One decoded increment of results for an in-progress search.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub fragments: Vec<HoldingFragment>,
    /// True while any participating catalog has not reported yet.
    pub more_pending: bool,
    /// Remote version counter, echoed back on the next poll.
    pub version: u64,
    /// Catalogs still running, for logging only.
    pub remains: Vec<String>,
}

/// Result of a successful `open`: the token plus the first page.
#[derive(Debug)]
pub struct OpenedSession {
    pub token: SessionToken,
    pub first_page: RawPage,
}

/// Seam between the orchestrator and the network, so tests can drive the
/// poll loop with a scripted fake.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn open(&self, query: &Query) -> Result<OpenedSession, SearchError>;
    async fn poll(&self, token: &SessionToken, version: u64) -> Result<RawPage, SearchError>;
}

#[async_trait]
impl<'a, T: SessionClient> SessionClient for &'a T {
    async fn open(&self, query: &Query) -> Result<OpenedSession, SearchError> {
        (**self).open(query).await
    }

    async fn poll(&self, token: &SessionToken, version: u64) -> Result<RawPage, SearchError> {
        (**self).poll(token, version).await
    }
}

// ─── Wire decoding ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireResponse {
    uuid: Option<String>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    books: Vec<WireBook>,
    #[serde(default)]
    remains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireBook {
    id: String,
    title: String,
    isbn: Option<String>,
    #[serde(default)]
    holdings: Vec<WireHolding>,
}

#[derive(Debug, Deserialize)]
struct WireHolding {
    system: String,
    status: Option<String>,
}

impl WireResponse {
    fn into_page(self) -> RawPage {
        let mut fragments = Vec::new();
        for book in self.books {
            for holding in book.holdings {
                fragments.push(HoldingFragment {
                    library_system: holding.system,
                    item_id: book.id.clone(),
                    title: book.title.clone(),
                    isbn: book.isbn.clone().filter(|s| !s.is_empty()),
                    status: holding.status.unwrap_or_default(),
                });
            }
        }
        RawPage {
            fragments,
            more_pending: self.running,
            version: self.version,
            remains: self.remains,
        }
    }
}

// ─── HTTP client ────────────────────────────────────────────────────────────

/// Client for the Unitrad union-catalog search endpoint.
///
/// Holds no per-search state; the active session token lives with the
/// orchestrator that owns the search. The `reqwest::Client` is injected so
/// its timeout policy is decided at startup.
pub struct UnitradClient {
    base_url: String,
    api_key: String,
    region: String,
    http: reqwest::Client,
}

impl UnitradClient {
    pub fn new(base_url: String, api_key: String, region: String, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            region,
            http,
        }
    }

    async fn request(
        &self,
        command: &str,
        params: &[(&str, String)],
    ) -> Result<WireResponse, SearchError> {
        let url = format!("{}/{}", self.base_url, command);
        log::debug!("GET {} ({} params)", url, params.len());

        let response = self.http.get(&url).query(params).send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(SearchError::Network(format!(
                "catalog service returned {status}"
            )));
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            // Only polling can lose its session; open has no token to lose.
            return Err(match command {
                "polling" => SearchError::SessionExpired,
                _ => SearchError::RemoteProtocol(format!("catalog service returned {status}")),
            });
        }
        if !status.is_success() {
            return Err(SearchError::RemoteProtocol(format!(
                "catalog service returned {status}"
            )));
        }

        response
            .json::<WireResponse>()
            .await
            .map_err(|e| SearchError::RemoteProtocol(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl SessionClient for UnitradClient {
    async fn open(&self, query: &Query) -> Result<OpenedSession, SearchError> {
        let mut params = query.wire_params();
        params.push(("region", self.region.clone()));
        if !self.api_key.is_empty() {
            params.push(("appkey", self.api_key.clone()));
        }

        let wire = self.request("search", &params).await?;
        let token = wire
            .uuid
            .clone()
            .filter(|u| !u.is_empty())
            .map(SessionToken)
            .ok_or_else(|| {
                SearchError::RemoteProtocol("search response carried no session token".to_string())
            })?;

        let first_page = wire.into_page();
        log::info!(
            "opened session {} ({} fragments, running={})",
            token.as_str(),
            first_page.fragments.len(),
            first_page.more_pending
        );
        Ok(OpenedSession { token, first_page })
    }

    async fn poll(&self, token: &SessionToken, version: u64) -> Result<RawPage, SearchError> {
        let params = [
            ("uuid", token.as_str().to_string()),
            ("version", version.to_string()),
            ("timeout", POLL_WAIT_SECS.to_string()),
        ];
        let page = self.request("polling", &params).await?.into_page();
        log::debug!(
            "polled session {}: {} fragments, running={}, remains={:?}",
            token.as_str(),
            page.fragments.len(),
            page.more_pending,
            page.remains
        );
        Ok(page)
    }
}
