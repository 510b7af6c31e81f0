//! Narrative grouper.
//!
//! Folds an ordered stream of [`Chunk`]s into titled [`NarrativeGroup`]s.
//! A chunk carrying title elements closes the group in progress and opens a
//! new one; untitled chunks extend the current group's content. A group is
//! "in progress" once some chunk has contributed non-title text, so a run of
//! title-only chunks stays one group and their titles merge with `" | "`.
//! The text of a title-bearing chunk replaces (rather than extends) the
//! pending content. Groups built without any title are labelled
//! `"Untitled"`.

use std::collections::BTreeSet;

use tracing::debug;

use crate::models::{Chunk, NarrativeGroup};

const TITLE_SEPARATOR: &str = " | ";
const UNTITLED: &str = "Untitled";

/// State threaded through the fold.
#[derive(Debug, Default)]
struct Accumulator {
    titles: Vec<String>,
    content: Vec<String>,
    pages: BTreeSet<u32>,
    /// Set once a chunk has added non-title text after the current titles.
    has_body: bool,
    groups: Vec<NarrativeGroup>,
}

impl Accumulator {
    fn step(mut self, chunk: &Chunk) -> Self {
        let text = chunk.text.trim();
        if text.is_empty() {
            self.pages.extend(chunk.page_number);
            return self;
        }

        let chunk_titles = chunk.titles();
        if chunk_titles.is_empty() {
            self.pages.extend(chunk.page_number);
            self.content.push(text.to_string());
            self.has_body = true;
            return self;
        }

        if self.has_body {
            let mut next = self.flush();
            next.titles = chunk_titles;
            next.content = vec![text.to_string()];
            next.pages = chunk.page_number.into_iter().collect();
            next.has_body = !chunk.is_title_only();
            return next;
        }

        self.pages.extend(chunk.page_number);
        self.titles.extend(chunk_titles);
        self.content = vec![text.to_string()];
        self.has_body = !chunk.is_title_only();
        self
    }

    /// Emit the group in progress, if any, and clear the working state.
    fn flush(self) -> Self {
        let Accumulator {
            titles,
            content,
            pages,
            mut groups,
            ..
        } = self;

        if !titles.is_empty() || !content.is_empty() {
            let title = if titles.is_empty() {
                UNTITLED.to_string()
            } else {
                titles.join(TITLE_SEPARATOR)
            };
            let group = NarrativeGroup {
                title,
                content: content.join(" ").trim().to_string(),
                page_numbers: pages.into_iter().collect(),
            };
            debug!(
                title = %group.title,
                pages = ?group.page_numbers,
                content_len = group.content.len(),
                "narrative group"
            );
            groups.push(group);
        }

        Accumulator {
            groups,
            ..Accumulator::default()
        }
    }
}

/// Group `chunks` into titled narrative sections, in arrival order.
pub fn group_narrative(chunks: &[Chunk]) -> Vec<NarrativeGroup> {
    let groups = chunks
        .iter()
        .fold(Accumulator::default(), Accumulator::step)
        .flush()
        .groups;
    debug!("Grouped {} chunks into {} narrative groups", chunks.len(), groups.len());
    groups
}
