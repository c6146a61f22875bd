//! Message sending helpers for the Telegram adapter.
//!
//! Telegram's message limit is 4096 characters; we use 4090 for safety.

/// Maximum characters per Telegram message.
const CHUNK_MAX: usize = 4090;

/// Code-fence-aware message splitter.
///
/// When a split falls inside a fenced code block, the fence is closed
/// before the chunk boundary and re-opened at the start of the next chunk,
/// so every chunk renders as valid markdown on its own.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in text.split('\n') {
        let cost = if current.is_empty() {
            line.len()
        } else {
            1 + line.len()
        };

        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(ref lang) = fence_lang {
                current.push_str("```");
                current.push_str(lang);
                current.push('\n');
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after_fence) = trimmed.strip_prefix("```") {
            if fence_lang.is_some() {
                fence_lang = None;
            } else {
                fence_lang = Some(after_fence.trim().to_string());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    // Safety net: force-split any single line longer than the limit.
    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
        } else {
            let mut rest = chunk.as_str();
            while !rest.is_empty() {
                let mut cut = std::cmp::min(CHUNK_MAX, rest.len());
                while cut > 0 && !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                result.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_chunks("hello");
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn long_text_splits_under_limit() {
        let text = "line\n".repeat(2000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_MAX));
    }

    #[test]
    fn code_fence_reopens_across_chunks() {
        let mut text = String::from("```rust\n");
        for _ in 0..1000 {
            text.push_str("let x = 1; // padding to push the fence over the limit\n");
        }
        text.push_str("```\n");

        let chunks = split_chunks(&text);
        assert!(chunks.len() > 1);
        assert!(chunks[0].ends_with("```"));
        assert!(chunks[1].starts_with("```rust"));
    }

    #[test]
    fn giant_single_line_is_force_split() {
        let text = "x".repeat(10_000);
        let chunks = split_chunks(&text);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_MAX));
        let total: usize = chunks.iter().map(String::len).sum();
        assert_eq!(total, 10_000);
    }
}
