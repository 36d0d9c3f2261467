//! Chunking strategies for splitting page text into retrieval units.
//!
//! All strategies implement [`Chunker`]: they take the ordered pages of one
//! source document and return [`Chunk`]s with contiguous `chunk_id`s
//! starting at 0, preserving page provenance. No strategy silently drops
//! input text; when a single unit exceeds the token budget it is recursed
//! or hard-split at word boundaries instead of truncated.
//!
//! Token counts are whitespace-word counts. This approximates model
//! tokenization the same way a chars-per-token ratio would, and keeps the
//! chunkers free of a model download.

use anyhow::Result;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Page};

/// Splits the pages of one source document into retrieval units.
pub trait Chunker: Send + Sync {
    fn chunk(&self, pages: &[Page], source_file: &str) -> Vec<Chunk>;
}

/// Approximate token count: whitespace-delimited words.
pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Instantiate the strategy named in the config.
pub fn create_chunker(config: &ChunkingConfig) -> Result<Box<dyn Chunker>> {
    match config.strategy.as_str() {
        "token_window" => Ok(Box::new(TokenWindowChunker::new(
            config.max_tokens,
            config.overlap_tokens,
        )?)),
        "recursive" => Ok(Box::new(RecursiveChunker::new(config.max_tokens))),
        "semantic" => Ok(Box::new(SemanticChunker::new(config.max_tokens))),
        "structure_aware" => Ok(Box::new(StructureAwareChunker::new(config.max_tokens))),
        other => anyhow::bail!("Unknown chunking strategy: {}", other),
    }
}

fn make_chunks(
    page_texts: Vec<(u32, Vec<String>)>,
    source_file: &str,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_id: u64 = 0;
    for (page, texts) in page_texts {
        for text in texts {
            if text.trim().is_empty() {
                continue;
            }
            chunks.push(Chunk {
                text,
                page,
                chunk_id,
                source_file: source_file.to_string(),
            });
            chunk_id += 1;
        }
    }
    chunks
}

// ============ Token window ============

/// Fixed-size sliding window over whitespace tokens with overlap.
///
/// Stride is `max_tokens - overlap`; the constructor rejects
/// `overlap >= max_tokens`, which would make the stride zero and the
/// window loop infinite.
pub struct TokenWindowChunker {
    max_tokens: usize,
    overlap: usize,
}

impl TokenWindowChunker {
    pub fn new(max_tokens: usize, overlap: usize) -> Result<Self> {
        if max_tokens == 0 {
            anyhow::bail!("max_tokens must be > 0");
        }
        if overlap >= max_tokens {
            anyhow::bail!(
                "overlap ({}) must be < max_tokens ({})",
                overlap,
                max_tokens
            );
        }
        Ok(Self {
            max_tokens,
            overlap,
        })
    }

    fn windows(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let stride = self.max_tokens - self.overlap;
        let mut out = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + self.max_tokens).min(words.len());
            out.push(words[start..end].join(" "));
            start += stride;
        }
        out
    }
}

impl Chunker for TokenWindowChunker {
    fn chunk(&self, pages: &[Page], source_file: &str) -> Vec<Chunk> {
        let per_page = pages
            .iter()
            .map(|p| (p.number, self.windows(&p.text)))
            .collect();
        make_chunks(per_page, source_file)
    }
}

// ============ Recursive ============

/// Splits at decreasing granularity: heading marker, blank line, newline,
/// sentence terminator, whitespace. At each level parts are greedily
/// accumulated while the buffer stays within budget; an oversized part is
/// recursed at the next finer level, or emitted as-is at the finest level.
pub struct RecursiveChunker {
    max_tokens: usize,
}

const RECURSIVE_DELIMITERS: [&str; 5] = ["\n#", "\n\n", "\n", ". ", " "];

impl RecursiveChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    fn split_recursive(&self, text: &str, level: usize) -> Vec<String> {
        let delimiter = RECURSIVE_DELIMITERS[level];
        let mut chunks = Vec::new();
        let mut current = String::new();

        for part in text.split(delimiter) {
            let combined = if current.is_empty() {
                part.to_string()
            } else {
                format!("{current}{delimiter}{part}")
            };

            if token_count(&combined) <= self.max_tokens {
                current = combined;
                continue;
            }

            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current.clear();
            }

            if token_count(part) > self.max_tokens {
                if level < RECURSIVE_DELIMITERS.len() - 1 {
                    chunks.extend(self.split_recursive(part, level + 1));
                } else {
                    // Finest level: emit as-is, accepting the overshoot.
                    chunks.push(part.trim().to_string());
                }
            } else {
                current = part.to_string();
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks.retain(|c| !c.is_empty());
        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, pages: &[Page], source_file: &str) -> Vec<Chunk> {
        let per_page = pages
            .iter()
            .map(|p| (p.number, self.split_recursive(&p.text, 0)))
            .collect();
        make_chunks(per_page, source_file)
    }
}

// ============ Greedy block grouping (shared) ============

/// Greedily concatenate blocks (joined by a blank line) into chunks of at
/// most `max_tokens`. A single block over budget is never truncated: it is
/// hard-split at word boundaries instead.
fn group_blocks(blocks: &[String], max_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for block in blocks {
        let candidate = if current.is_empty() {
            block.clone()
        } else {
            format!("{current}\n\n{block}")
        };

        if token_count(&candidate) <= max_tokens {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if token_count(block) > max_tokens {
            chunks.extend(hard_split(block, max_tokens));
        } else {
            current = block.clone();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Last-resort word-level split for a block that alone exceeds the budget.
fn hard_split(text: &str, max_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if token_count(&candidate) > max_tokens {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current = word.to_string();
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

// ============ Semantic ============

/// Groups lines into paragraph blocks at blank-line boundaries, then
/// greedily packs blocks into chunks.
pub struct SemanticChunker {
    max_tokens: usize,
}

impl SemanticChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    fn split_blocks(text: &str) -> Vec<String> {
        let mut blocks = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in text.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                if !current.is_empty() {
                    blocks.push(current.join("\n").trim().to_string());
                    current.clear();
                }
            } else {
                current.push(line);
            }
        }
        if !current.is_empty() {
            blocks.push(current.join("\n").trim().to_string());
        }

        blocks.retain(|b| !b.is_empty());
        blocks
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, pages: &[Page], source_file: &str) -> Vec<Chunk> {
        let per_page = pages
            .iter()
            .map(|p| {
                let blocks = Self::split_blocks(&p.text);
                (p.number, group_blocks(&blocks, self.max_tokens))
            })
            .collect();
        make_chunks(per_page, source_file)
    }
}

// ============ Structure-aware ============

/// Groups lines into blocks using structural cues: headings and list
/// markers start a new block, brace-delimited regions are kept atomic,
/// indented or colon-terminated lines are treated as code. Blocks are then
/// packed like [`SemanticChunker`].
pub struct StructureAwareChunker {
    max_tokens: usize,
}

impl StructureAwareChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    fn is_heading(line: &str) -> bool {
        let t = line.trim_start();
        if t.starts_with('#') {
            return true;
        }
        // Outline markers: "I.", "II.", "A.", "3."
        for prefix in ["III.", "II.", "I."] {
            if t.starts_with(prefix) {
                return true;
            }
        }
        let mut chars = t.chars();
        match (chars.next(), chars.next()) {
            (Some(c), Some('.')) if c.is_ascii_uppercase() => true,
            (Some(c), _) if c.is_ascii_digit() => {
                let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
                t[digits..].starts_with('.')
            }
            _ => false,
        }
    }

    fn is_list_item(line: &str) -> bool {
        let t = line.trim_start();
        if t.starts_with('-') || t.starts_with('•') || t.starts_with('*') {
            return true;
        }
        let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
        digits > 0 && t[digits..].starts_with('.')
    }

    fn is_code_line(line: &str) -> bool {
        line.starts_with("    ") || line.starts_with('\t') || line.trim_end().ends_with(':')
    }

    fn group_lines_into_blocks(text: &str) -> Vec<String> {
        let mut blocks: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut inside_braces = false;

        let flush = |current: &mut Vec<&str>, blocks: &mut Vec<String>| {
            if !current.is_empty() {
                blocks.push(current.join("\n").trim().to_string());
                current.clear();
            }
        };

        for line in text.lines() {
            let line = line.trim_end();

            if inside_braces {
                current.push(line);
                if line.contains('}') {
                    inside_braces = false;
                    flush(&mut current, &mut blocks);
                }
                continue;
            }

            if line.contains('{') {
                inside_braces = true;
                current.push(line);
                continue;
            }

            if Self::is_heading(line) || Self::is_list_item(line) || Self::is_code_line(line) {
                flush(&mut current, &mut blocks);
                current.push(line);
            } else if line.trim().is_empty() {
                flush(&mut current, &mut blocks);
            } else {
                current.push(line);
            }
        }
        flush(&mut current, &mut blocks);

        blocks.retain(|b| !b.is_empty());
        blocks
    }
}

impl Chunker for StructureAwareChunker {
    fn chunk(&self, pages: &[Page], source_file: &str) -> Vec<Chunk> {
        let per_page = pages
            .iter()
            .map(|p| {
                let blocks = Self::group_lines_into_blocks(&p.text);
                (p.number, group_blocks(&blocks, self.max_tokens))
            })
            .collect();
        make_chunks(per_page, source_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<Page> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Page::new(i as u32 + 1, *t))
            .collect()
    }

    fn all_strategies(max_tokens: usize) -> Vec<Box<dyn Chunker>> {
        vec![
            Box::new(TokenWindowChunker::new(max_tokens, max_tokens / 4).unwrap()),
            Box::new(RecursiveChunker::new(max_tokens)),
            Box::new(SemanticChunker::new(max_tokens)),
            Box::new(StructureAwareChunker::new(max_tokens)),
        ]
    }

    #[test]
    fn overlap_must_be_below_window() {
        assert!(TokenWindowChunker::new(100, 100).is_err());
        assert!(TokenWindowChunker::new(100, 150).is_err());
        assert!(TokenWindowChunker::new(100, 99).is_ok());
    }

    #[test]
    fn token_window_overlaps_consecutive_chunks() {
        let chunker = TokenWindowChunker::new(4, 2).unwrap();
        let text = "one two three four five six seven eight";
        let chunks = chunker.chunk(&pages(&[text]), "doc.pdf");
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].text, "one two three four");
        // Stride 2: the next window re-starts two words back.
        assert_eq!(chunks[1].text, "three four five six");
    }

    #[test]
    fn chunk_ids_unique_and_increasing_for_all_strategies() {
        let input = pages(&[
            "# Heading\n\nFirst paragraph with several words in it.\n\nSecond paragraph here.",
            "Another page.\n\n- item one\n- item two\n\nClosing text for the page.",
        ]);
        for chunker in all_strategies(8) {
            let chunks = chunker.chunk(&input, "doc.pdf");
            assert!(!chunks.is_empty());
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.chunk_id, i as u64);
                assert_eq!(c.source_file, "doc.pdf");
            }
        }
    }

    #[test]
    fn page_provenance_preserved() {
        let input = pages(&["page one text", "page two text"]);
        for chunker in all_strategies(50) {
            let chunks = chunker.chunk(&input, "doc.pdf");
            assert!(chunks.iter().any(|c| c.page == 1));
            assert!(chunks.iter().any(|c| c.page == 2));
        }
    }

    #[test]
    fn no_content_dropped() {
        let text = "Alpha beta gamma.\n\nDelta epsilon zeta eta.\n\nTheta iota kappa \
                    lambda mu nu xi omicron pi rho sigma tau.";
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .collect();
        for chunker in all_strategies(5) {
            let chunks = chunker.chunk(&pages(&[text]), "doc.pdf");
            let combined = chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            for word in &words {
                assert!(
                    combined.contains(word),
                    "strategy dropped '{}': {:?}",
                    word,
                    combined
                );
            }
        }
    }

    #[test]
    fn oversized_block_is_hard_split_not_truncated() {
        let long_block: String = (0..40).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunks = SemanticChunker::new(10).chunk(&pages(&[long_block.as_str()]), "d.pdf");
        assert!(chunks.len() >= 4);
        for c in &chunks {
            assert!(token_count(&c.text) <= 10);
        }
        assert!(chunks.iter().any(|c| c.text.contains("word39")));
    }

    #[test]
    fn recursive_respects_budget_on_structured_text() {
        let text = "# Intro\nShort intro line.\n# Body\nFirst sentence here. Second sentence \
                    follows. Third sentence closes.\n# End\nDone.";
        let chunks = RecursiveChunker::new(6).chunk(&pages(&[text]), "d.pdf");
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(
                token_count(&c.text) <= 6,
                "chunk over budget: {:?}",
                c.text
            );
        }
    }

    #[test]
    fn structure_aware_keeps_braced_region_atomic() {
        let text = "Intro line.\n\n{\n  \"key\": \"value\",\n  \"num\": 3\n}\n\nOutro line.";
        let blocks = StructureAwareChunker::group_lines_into_blocks(text);
        let json_block = blocks
            .iter()
            .find(|b| b.contains("\"key\""))
            .expect("braced block present");
        assert!(json_block.contains('{') && json_block.contains('}'));
    }

    #[test]
    fn structure_aware_heading_starts_new_block() {
        let text = "1. First section\ncontinuation text\n2. Second section\nmore text";
        let blocks = StructureAwareChunker::group_lines_into_blocks(text);
        assert!(blocks.len() >= 2);
        assert!(blocks[0].starts_with("1. First section"));
    }

    #[test]
    fn empty_pages_produce_no_chunks() {
        for chunker in all_strategies(10) {
            assert!(chunker.chunk(&pages(&["", "   \n  "]), "d.pdf").is_empty());
        }
    }
}
