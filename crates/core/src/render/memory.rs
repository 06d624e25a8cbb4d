use crate::av::{AvTag, CardSide};
use crate::config::{Card, CardId};
use crate::render::{RenderError, TagRenderer};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, Default)]
struct RenderedCard {
    question: Vec<AvTag>,
    answer: Vec<AvTag>,
}

/// Renderer backed by pre-extracted tag lists.
#[derive(Debug, Default)]
pub struct InMemoryRenderer {
    cards: BTreeMap<CardId, RenderedCard>,
    renders: AtomicUsize,
}

impl InMemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, id: CardId, question: Vec<AvTag>, answer: Vec<AvTag>) -> Self {
        self.cards.insert(id, RenderedCard { question, answer });
        self
    }

    /// Number of `render_tags` calls served so far.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }
}

impl TagRenderer for InMemoryRenderer {
    fn render_tags<'a>(
        &'a self,
        card: &'a Card,
        side: CardSide,
    ) -> BoxFuture<'a, Result<Vec<AvTag>, RenderError>> {
        async move {
            self.renders.fetch_add(1, Ordering::Relaxed);
            let rendered = self
                .cards
                .get(&card.id)
                .ok_or(RenderError::CardNotFound(card.id))?;
            Ok(match side {
                CardSide::Front => rendered.question.clone(),
                CardSide::Back => rendered.answer.clone(),
            })
        }
        .boxed()
    }
}
