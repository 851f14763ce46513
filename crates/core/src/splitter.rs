use std::collections::VecDeque;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Splits text on the coarsest separator that keeps pieces under
/// `chunk_size` characters, then greedily merges neighbours back together
/// with up to `chunk_overlap` characters carried into the next chunk.
#[derive(Clone, Debug)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let idx = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
            .unwrap_or(separators.len().saturating_sub(1));
        let sep = separators.get(idx).map(String::as_str).unwrap_or("");
        let rest = separators.get(idx + 1..).unwrap_or(&[]);

        let mut out = Vec::new();
        let mut small: Vec<&str> = Vec::new();
        for piece in pieces(text, sep) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                out.extend(self.merge(&small, sep));
                small.clear();
            }
            if rest.is_empty() {
                out.push(piece.to_string());
            } else {
                out.extend(self.split_with(piece, rest));
            }
        }
        if !small.is_empty() {
            out.extend(self.merge(&small, sep));
        }
        out
    }

    fn merge(&self, splits: &[&str], sep: &str) -> Vec<String> {
        let sep_len = char_len(sep);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;
        for &piece in splits {
            let len = char_len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };
            if total + len + joiner > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current, sep);
                while let Some(front) = current.front() {
                    let over_overlap = total > self.chunk_overlap;
                    let still_too_big = total + len + sep_len > self.chunk_size;
                    if !(over_overlap || still_too_big) {
                        break;
                    }
                    total -= char_len(front) + if current.len() > 1 { sep_len } else { 0 };
                    current.pop_front();
                }
            }
            total += len + if current.is_empty() { 0 } else { sep_len };
            current.push_back(piece);
        }
        if !current.is_empty() {
            push_joined(&mut docs, &current, sep);
        }
        docs
    }
}

fn pieces<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if sep.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(sep).filter(|s| !s.is_empty()).collect()
    }
}

fn push_joined(docs: &mut Vec<String>, parts: &VecDeque<&str>, sep: &str) {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(sep);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let s = RecursiveSplitter::new(100, 10);
        assert_eq!(s.split("p1\n\np2"), vec!["p1\n\np2"]);
        assert!(s.split("").is_empty());
    }

    #[test]
    fn words_merge_up_to_chunk_size() {
        let s = RecursiveSplitter::new(10, 0);
        assert_eq!(s.split("aaaa bbbb cccc"), vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn overlap_carries_trailing_piece() {
        let s = RecursiveSplitter::new(10, 4);
        assert_eq!(s.split("aaaa bbbb cccc"), vec!["aaaa bbbb", "bbbb cccc"]);
    }

    #[test]
    fn unbreakable_run_falls_back_to_characters() {
        let s = RecursiveSplitter::new(10, 0);
        let text = "x".repeat(25);
        let chunks = s.split(&text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let s = RecursiveSplitter::new(12, 0);
        let chunks = s.split("first para\n\nsecond one");
        assert_eq!(chunks, vec!["first para", "second one"]);
    }
}
