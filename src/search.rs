use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregate::AggregatedResult;
use crate::error::SearchError;
use crate::query::Query;
use crate::unitrad::{OpenedSession, RawPage, SessionClient, SessionToken};

/// Tuning knobs for one search run.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Cumulative wall-clock budget for the whole search.
    pub deadline: Duration,
    /// First pause before polling; doubles per cycle up to `max_backoff`.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Maximum attempts per remote call; transient failures beyond this
    /// fail the search.
    pub retry_limit: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(25),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            retry_limit: 3,
        }
    }
}

/// Final result of one search, handed back to the tool adapter.
#[derive(Debug)]
pub enum SearchOutcome {
    Complete(AggregatedResult),
    /// Deadline hit first; carries everything aggregated so far.
    PartialTimeout(AggregatedResult),
    Failed(SearchError),
}

/// Bookkeeping for one in-flight session, owned by the orchestrator.
struct SearchSession {
    token: SessionToken,
    version: u64,
    poll_count: u32,
    more_pending: bool,
}

/// Explicit search states; the terminal three are absorbing.
enum SearchState {
    Initiated,
    Polling,
    Complete,
    TimedOut,
    Failed(SearchError),
}

/// Either a decoded page or the signal that the deadline expired while
/// waiting to attempt the next poll.
enum PollStep {
    Page(RawPage),
    Deadline,
}

/// Drives one query through the Unitrad session lifecycle.
///
/// One instance per query; nothing here is shared between concurrent
/// searches except the client, which is stateless between queries.
pub struct SearchOrchestrator<C> {
    client: C,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl<C: SessionClient> SearchOrchestrator<C> {
    pub fn new(client: C, policy: PollPolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    /// Run the search to a terminal state and return its outcome.
    pub async fn run(&self, query: &Query) -> SearchOutcome {
        let search_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let deadline = started + self.policy.deadline;

        let mut result = AggregatedResult::new();
        let mut session: Option<SearchSession> = None;
        let mut interval = self.policy.initial_backoff;
        let mut state = SearchState::Initiated;

        loop {
            state = match state {
                SearchState::Initiated => match self.open_session(query).await {
                    Ok(opened) => {
                        let OpenedSession { token, first_page } = opened;
                        let more_pending = first_page.more_pending;
                        session = Some(SearchSession {
                            token,
                            version: first_page.version,
                            poll_count: 0,
                            more_pending,
                        });
                        result = result.merge(first_page);
                        if more_pending {
                            SearchState::Polling
                        } else {
                            SearchState::Complete
                        }
                    }
                    Err(err) => SearchState::Failed(err),
                },

                SearchState::Polling => {
                    // Pace before the next attempt; cancellation may land
                    // while we wait.
                    if !self.wait(interval).await {
                        SearchState::Failed(SearchError::Cancelled)
                    } else {
                        let session = session.as_mut().expect("polling without a session");
                        match self.poll_session(session, deadline).await {
                            Ok(PollStep::Deadline) => SearchState::TimedOut,
                            Ok(PollStep::Page(page)) => {
                                session.poll_count += 1;
                                session.version = page.version;
                                session.more_pending = page.more_pending;
                                result = result.merge(page);
                                interval = (interval * 2).min(self.policy.max_backoff);
                                if session.more_pending {
                                    SearchState::Polling
                                } else {
                                    SearchState::Complete
                                }
                            }
                            Err(err) => SearchState::Failed(err),
                        }
                    }
                }

                SearchState::Complete => {
                    log::info!(
                        "search {}: complete, {} holdings after {} poll(s) in {:?}",
                        search_id,
                        result.len(),
                        session.as_ref().map_or(0, |s| s.poll_count),
                        started.elapsed()
                    );
                    return SearchOutcome::Complete(result);
                }

                SearchState::TimedOut => {
                    log::warn!(
                        "search {}: deadline {:?} exceeded, returning {} partial holding(s)",
                        search_id,
                        self.policy.deadline,
                        result.len()
                    );
                    return SearchOutcome::PartialTimeout(result);
                }

                SearchState::Failed(err) => {
                    log::warn!("search {}: failed: {}", search_id, err);
                    return SearchOutcome::Failed(err);
                }
            };
        }
    }

    /// Open with bounded retry on transient failures. No session exists yet,
    /// so expiry cannot occur here.
    async fn open_session(&self, query: &Query) -> Result<OpenedSession, SearchError> {
        let mut retry_pause = self.policy.initial_backoff;
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("cancellation received, abandoning in-flight open");
                    return Err(SearchError::Cancelled);
                }
                opened = self.client.open(query) => opened,
            };
            match opened {
                Ok(opened) => return Ok(opened),
                Err(err) if err.is_transient() && attempt < self.policy.retry_limit => {
                    log::warn!(
                        "open attempt {}/{} failed: {}",
                        attempt,
                        self.policy.retry_limit,
                        err
                    );
                    attempt += 1;
                    if !self.wait(retry_pause).await {
                        return Err(SearchError::Cancelled);
                    }
                    retry_pause = (retry_pause * 2).min(self.policy.max_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One poll, with bounded retry on transient failures. The deadline is
    /// checked before every attempt; an in-flight call is never cut short
    /// by the deadline, only by cancellation.
    async fn poll_session(
        &self,
        session: &SearchSession,
        deadline: Instant,
    ) -> Result<PollStep, SearchError> {
        let mut retry_pause = self.policy.initial_backoff;
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(PollStep::Deadline);
            }
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("cancellation received, abandoning in-flight poll");
                    return Err(SearchError::Cancelled);
                }
                polled = self.client.poll(&session.token, session.version) => polled,
            };
            match polled {
                Ok(page) => return Ok(PollStep::Page(page)),
                Err(err) if err.is_transient() && attempt < self.policy.retry_limit => {
                    log::warn!(
                        "poll attempt {}/{} failed: {}",
                        attempt,
                        self.policy.retry_limit,
                        err
                    );
                    attempt += 1;
                    if !self.wait(retry_pause).await {
                        return Err(SearchError::Cancelled);
                    }
                    retry_pause = (retry_pause * 2).min(self.policy.max_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Cancellable sleep; false when cancellation fired first.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
