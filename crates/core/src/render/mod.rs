mod memory;

use crate::av::{AvTag, CardSide};
use crate::config::{Card, CardId};
use futures::future::BoxFuture;

pub use memory::InMemoryRenderer;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("card {0} not found")]
    CardNotFound(CardId),
}

/// Produces the ordered AV tags of one side of a rendered card.
pub trait TagRenderer: Send + Sync {
    fn render_tags<'a>(
        &'a self,
        card: &'a Card,
        side: CardSide,
    ) -> BoxFuture<'a, Result<Vec<AvTag>, RenderError>>;
}
