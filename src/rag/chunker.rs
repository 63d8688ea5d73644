use serde_json::json;

use crate::data::Article;

/// Splits text into fixed-size overlapping windows.
///
/// The stride is `chunk_size - overlap`, so the last `overlap` characters
/// of each chunk reappear at the start of the next one. A boundary may
/// fall mid-sentence; the overlap is what keeps facts that straddle a
/// boundary retrievable.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        assert!(
            overlap < chunk_size,
            "chunk overlap must be smaller than chunk size"
        );
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Split `text` into overlapping chunks. Empty or whitespace-only
    /// input yields no chunks; input shorter than the chunk size yields
    /// exactly one.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Work on char indices so multi-byte input can't split a code point
        let chars: Vec<char> = text.chars().collect();
        let stride = self.chunk_size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        chunks
    }

    /// Chunk an article as `title\n\ncontent`, attaching denormalized
    /// metadata to each chunk so search can filter without a join.
    pub fn article_chunks(&self, article: &Article) -> Vec<(String, serde_json::Value)> {
        let full_text = if article.content.trim().is_empty() {
            article.title.clone()
        } else {
            format!("{}\n\n{}", article.title, article.content)
        };

        let chunks = self.split(&full_text);
        let total = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let metadata = json!({
                    "article_id": article.id,
                    "ticker": article.ticker_symbol,
                    "title": article.title,
                    "source": article.source.as_deref().unwrap_or("unknown"),
                    "published_at": article.published_at.map(|t| t.to_rfc3339()),
                    "type": article.article_type,
                    "chunk_index": i,
                    "total_chunks": total,
                });
                (text, metadata)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text_of_len(n: usize) -> String {
        "abcdefghij".chars().cycle().take(n).collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = Chunker::new(500, 50);
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n\t ").is_empty());
    }

    #[test]
    fn short_text_yields_one_chunk() {
        let chunker = Chunker::new(500, 50);
        let text = text_of_len(499);
        assert_eq!(chunker.split(&text), vec![text.clone()]);

        let exact = text_of_len(500);
        assert_eq!(chunker.split(&exact).len(), 1);
    }

    #[test]
    fn chunk_count_follows_stride_formula() {
        let chunker = Chunker::new(500, 50);
        // n = ceil((L - overlap) / (chunk_size - overlap)) for L >= chunk_size
        for len in [500usize, 501, 950, 951, 2000, 5000] {
            let expected = (len - 50).div_ceil(450);
            let chunks = chunker.split(&text_of_len(len));
            assert_eq!(chunks.len(), expected, "len = {len}");
        }
    }

    #[test]
    fn consecutive_chunks_share_exact_overlap() {
        let chunker = Chunker::new(500, 50);
        let text = text_of_len(2000);
        let chunks = chunker.split(&text);

        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 50).collect();
            let head: String = pair[1].chars().take(50).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn multibyte_input_does_not_panic() {
        let chunker = Chunker::new(10, 3);
        let text = "日本語のテキストを分割するテストです。絵文字🚀も含めて確認します。";
        let chunks = chunker.split(text);
        assert!(!chunks.is_empty());
        // Reassembling without the overlapping heads gives back the input
        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(3));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn article_chunks_carry_metadata() {
        let chunker = Chunker::new(500, 50);
        let article = Article {
            id: 42,
            ticker_symbol: "AAPL".to_string(),
            title: "Apple ships new chip".to_string(),
            content: "The chip is fast.".to_string(),
            published_at: None,
            source: Some("Newswire".to_string()),
            url: Some("https://example.com/a".to_string()),
            article_type: "news".to_string(),
        };

        let chunks = chunker.article_chunks(&article);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.starts_with("Apple ships new chip\n\n"));
        assert_eq!(chunks[0].1["ticker"], "AAPL");
        assert_eq!(chunks[0].1["source"], "Newswire");
        assert_eq!(chunks[0].1["chunk_index"], 0);
    }

    #[test]
    fn empty_article_body_falls_back_to_title() {
        let chunker = Chunker::default();
        let article = Article {
            id: 1,
            ticker_symbol: "MSFT".to_string(),
            title: "Short headline".to_string(),
            content: String::new(),
            published_at: None,
            source: None,
            url: None,
            article_type: "news".to_string(),
        };

        let chunks = chunker.article_chunks(&article);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, "Short headline");
    }
}
