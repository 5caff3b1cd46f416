use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Tool;
use crate::aggregate::{AggregatedResult, HoldingRecord};
use crate::error::SearchError;
use crate::query::Query;
use crate::search::{PollPolicy, SearchOrchestrator, SearchOutcome};
use crate::unitrad::SessionClient;

/// Response schema for `nlib_search_books`. `complete` is false when the
/// deadline cut the search short and `holdings` is best-effort.
#[derive(Debug, Serialize)]
pub struct SearchBooksResponse {
    pub complete: bool,
    pub holdings: Vec<HoldingRecord>,
}

/// Adapter between the host tool protocol and the search orchestrator.
pub struct SearchBooksTool<C> {
    client: C,
    policy: PollPolicy,
    /// Configured fallback output filter, used when the request carries none.
    default_filter: Option<String>,
}

impl<C> SearchBooksTool<C> {
    pub fn new(client: C, policy: PollPolicy, default_filter: Option<String>) -> Self {
        Self {
            client,
            policy,
            default_filter,
        }
    }

    pub fn description() -> &'static str {
        "Search the municipal library's holdings through the Unitrad union \
         catalog. At least one of title, author, publisher, keyword or isbn \
         is required; library_system optionally narrows the results to one \
         participating system."
    }

    pub fn input_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Item title" },
                "author": { "type": "string", "description": "Author name" },
                "publisher": { "type": "string", "description": "Publisher name" },
                "keyword": { "type": "string", "description": "Free-text keyword" },
                "isbn": { "type": "string", "description": "ISBN, 10 or 13 digits" },
                "library_system": {
                    "type": "string",
                    "description": "Restrict results to one library system"
                }
            }
        })
    }

    fn respond(&self, complete: bool, result: AggregatedResult, query: &Query) -> SearchBooksResponse {
        let filter = query
            .library_filter()
            .or(self.default_filter.as_deref())
            .map(str::to_string);
        let holdings: Vec<HoldingRecord> = result
            .into_records()
            .into_iter()
            .filter(|record| match &filter {
                Some(system) => &record.library_system == system,
                None => true,
            })
            .collect();
        SearchBooksResponse { complete, holdings }
    }
}

#[async_trait::async_trait]
impl<C: SessionClient> Tool for SearchBooksTool<C> {
    type Input = (Query, CancellationToken);
    type Output = SearchBooksResponse;

    fn name(&self) -> &str {
        "nlib_search_books"
    }

    async fn run(&self, input: (Query, CancellationToken)) -> Result<SearchBooksResponse, SearchError> {
        let (query, cancel) = input;

        if query.is_empty() {
            return Err(SearchError::InvalidInput(
                "at least one of title, author, publisher, keyword or isbn is required"
                    .to_string(),
            ));
        }

        log::info!("nlib_search_books: starting catalog search");
        let orchestrator =
            SearchOrchestrator::new(&self.client, self.policy.clone(), cancel);
        match orchestrator.run(&query).await {
            SearchOutcome::Complete(result) => {
                let response = self.respond(true, result, &query);
                log::info!(
                    "nlib_search_books: complete, {} holding(s)",
                    response.holdings.len()
                );
                Ok(response)
            }
            SearchOutcome::PartialTimeout(result) => {
                if result.is_empty() {
                    log::warn!("nlib_search_books: deadline hit before any catalog reported");
                }
                let response = self.respond(false, result, &query);
                log::info!(
                    "nlib_search_books: partial after timeout, {} holding(s)",
                    response.holdings.len()
                );
                Ok(response)
            }
            SearchOutcome::Failed(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unitrad::{HoldingFragment, OpenedSession, RawPage, SessionToken};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Serves one scripted open result, then panics on further calls.
    struct FakeClient {
        open: Mutex<Option<Result<OpenedSession, SearchError>>>,
        calls: AtomicU32,
    }

    impl FakeClient {
        fn new(open: Result<OpenedSession, SearchError>) -> Self {
            Self {
                open: Mutex::new(Some(open)),
                calls: AtomicU32::new(0),
            }
        }

        fn unreachable() -> Self {
            Self {
                open: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionClient for FakeClient {
        async fn open(&self, _query: &Query) -> Result<OpenedSession, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.open
                .lock()
                .unwrap()
                .take()
                .expect("unexpected open call")
        }

        async fn poll(
            &self,
            _token: &SessionToken,
            _version: u64,
        ) -> Result<RawPage, SearchError> {
            panic!("unexpected poll call")
        }
    }

    fn fragment(system: &str, item: &str, status: &str) -> HoldingFragment {
        HoldingFragment {
            library_system: system.to_string(),
            item_id: item.to_string(),
            title: format!("title-{item}"),
            isbn: None,
            status: status.to_string(),
        }
    }

    fn opened(fragments: Vec<HoldingFragment>) -> OpenedSession {
        OpenedSession {
            token: SessionToken::test("S1"),
            first_page: RawPage {
                fragments,
                more_pending: false,
                version: 1,
                remains: Vec::new(),
            },
        }
    }

    fn tool(client: FakeClient) -> SearchBooksTool<FakeClient> {
        SearchBooksTool::new(client, PollPolicy::default(), None)
    }

    #[tokio::test]
    async fn test_empty_query_fails_without_remote_contact() {
        let tool = tool(FakeClient::unreachable());
        let err = tool
            .run((Query::default(), CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
        assert_eq!(tool.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_complete_search_serializes_holdings() {
        let tool = tool(FakeClient::new(Ok(opened(vec![
            fragment("A", "a1", "available"),
            fragment("B", "b1", "unknown"),
        ]))));
        let query = Query {
            isbn: Some("9784000000000".to_string()),
            ..Query::default()
        };
        let response = tool.run((query, CancellationToken::new())).await.unwrap();
        assert!(response.complete);
        assert_eq!(response.holdings.len(), 2);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["holdings"][0]["status"], "available");
        assert_eq!(json["holdings"][1]["status"], "unknown");
        assert!(json["holdings"][0].get("isbn").is_none());
    }

    #[tokio::test]
    async fn test_library_system_filter_applies_on_output() {
        let tool = tool(FakeClient::new(Ok(opened(vec![
            fragment("A", "a1", "available"),
            fragment("B", "b1", "available"),
        ]))));
        let query = Query {
            keyword: Some("astronomy".to_string()),
            library_system: Some("B".to_string()),
            ..Query::default()
        };
        let response = tool.run((query, CancellationToken::new())).await.unwrap();
        assert_eq!(response.holdings.len(), 1);
        assert_eq!(response.holdings[0].library_system, "B");
    }

    #[tokio::test]
    async fn test_failure_surfaces_category_only() {
        let tool = tool(FakeClient::new(Err(SearchError::RemoteProtocol(
            "internal detail".to_string(),
        ))));
        let query = Query {
            title: Some("星の王子さま".to_string()),
            ..Query::default()
        };
        let err = tool.run((query, CancellationToken::new())).await.unwrap_err();
        assert_eq!(err.category(), "remote_protocol_error");
    }
}
