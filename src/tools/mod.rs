pub mod search_books;

pub use search_books::SearchBooksTool;

use crate::error::SearchError;

/// Tool trait for host-invocable operations.
///
/// Not object-safe (associated types) — intentional.
/// The server dispatches to tools by concrete type, not `dyn Tool`.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn name(&self) -> &str;
    async fn run(&self, input: Self::Input) -> Result<Self::Output, SearchError>;
}
