//! Layout element extraction from raw analysis pages.
//!
//! Each results page carries a flat `Blocks` array. `LAYOUT_*` blocks mark
//! regions of the page (titles, paragraphs, lists, tables, ...) and point at
//! their `LINE` blocks through `CHILD` relationships. This module rebuilds
//! one [`ExtractedElement`] per top-level layout block, in reading order.
//!
//! Layout blocks nested inside another layout block (the items of a
//! `LAYOUT_LIST`, for instance) are folded into their parent's text rather
//! than emitted twice.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{AnalysisResult, ElementCategory, ExtractedElement};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Block {
    block_type: String,
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Relationship {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    ids: Vec<String>,
}

impl Block {
    fn children(&self) -> impl Iterator<Item = &str> {
        self.relationships
            .iter()
            .filter(|r| r.kind == "CHILD")
            .flat_map(|r| r.ids.iter().map(String::as_str))
    }
}

/// Map a Textract layout block type to an element category.
pub fn category_for(block_type: &str) -> Option<ElementCategory> {
    let category = match block_type {
        "LAYOUT_TITLE" | "LAYOUT_SECTION_HEADER" => ElementCategory::Title,
        "LAYOUT_TEXT" => ElementCategory::NarrativeText,
        "LAYOUT_LIST" => ElementCategory::ListItem,
        "LAYOUT_TABLE" => ElementCategory::Table,
        "LAYOUT_FIGURE" => ElementCategory::Image,
        "LAYOUT_HEADER" => ElementCategory::Header,
        "LAYOUT_FOOTER" => ElementCategory::Footer,
        "LAYOUT_PAGE_NUMBER" => ElementCategory::PageNumber,
        "LAYOUT_KEY_VALUE" => ElementCategory::Text,
        _ => return None,
    };
    Some(category)
}

/// Extract layout elements from every page of `result`.
pub fn extract_elements(result: &AnalysisResult) -> Vec<ExtractedElement> {
    elements_from_pages(&result.pages)
}

/// Extract layout elements from raw results pages, in document order.
///
/// Blocks that do not deserialize are skipped.
pub fn elements_from_pages(pages: &[Value]) -> Vec<ExtractedElement> {
    let blocks: Vec<Block> = pages
        .iter()
        .filter_map(|page| page.get("Blocks").and_then(Value::as_array))
        .flatten()
        .filter_map(|b| serde_json::from_value(b.clone()).ok())
        .collect();

    let by_id: HashMap<&str, &Block> = blocks.iter().map(|b| (b.id.as_str(), b)).collect();

    let nested: HashSet<&str> = blocks
        .iter()
        .filter(|b| category_for(&b.block_type).is_some())
        .flat_map(|b| b.children())
        .filter(|id| {
            by_id
                .get(id)
                .is_some_and(|c| category_for(&c.block_type).is_some())
        })
        .collect();

    let elements: Vec<ExtractedElement> = blocks
        .iter()
        .filter(|b| !nested.contains(b.id.as_str()))
        .filter_map(|b| {
            let category = category_for(&b.block_type)?;
            let mut lines = Vec::new();
            collect_lines(b, &by_id, &mut lines, 0);
            Some(ExtractedElement::new(category, lines.join(" "), b.page))
        })
        .collect();

    debug!(
        "Extracted {} layout elements from {} blocks",
        elements.len(),
        blocks.len()
    );
    elements
}

/// Relationship graphs are trees in practice; the depth cap guards against
/// malformed cycles.
const MAX_DEPTH: usize = 8;

fn collect_lines<'a>(
    block: &'a Block,
    by_id: &HashMap<&str, &'a Block>,
    out: &mut Vec<&'a str>,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        return;
    }
    for id in block.children() {
        let Some(&child) = by_id.get(id) else {
            continue;
        };
        match child.block_type.as_str() {
            "LINE" => {
                if let Some(text) = child.text.as_deref() {
                    let text = text.trim();
                    if !text.is_empty() {
                        out.push(text);
                    }
                }
            }
            t if category_for(t).is_some() => collect_lines(child, by_id, out, depth + 1),
            _ => {}
        }
    }
}
