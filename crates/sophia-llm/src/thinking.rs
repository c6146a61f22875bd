//! Stripping of `<think>…</think>` reasoning blocks from model output.
//!
//! Local models served through LM Studio or llama.cpp emit reasoning tokens
//! wrapped in these tags. Downstream code (extraction JSON parsing, journal
//! notes, channel responses) must only see the final answer.

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Remove every `<think>…</think>` block from `text`.
///
/// An unclosed `<think>` at the tail swallows the rest of the string: a
/// truncated response must not leak half a reasoning block to the caller.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + THINK_OPEN.len()..];
        match after_open.find(THINK_CLOSE) {
            Some(close) => rest = &after_open[close + THINK_CLOSE.len()..],
            None => {
                // Unclosed block at the tail: drop everything after the tag.
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_block() {
        let input = "<think>let me reason</think>The answer is 42.";
        assert_eq!(strip_think_blocks(input), "The answer is 42.");
    }

    #[test]
    fn strips_multiple_blocks() {
        let input = "a<think>x</think>b<think>y</think>c";
        assert_eq!(strip_think_blocks(input), "abc");
    }

    #[test]
    fn strips_unclosed_tail_block() {
        let input = "Here you go.<think>hmm, but actually";
        assert_eq!(strip_think_blocks(input), "Here you go.");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_think_blocks("just text"), "just text");
    }

    #[test]
    fn handles_block_spanning_newlines() {
        let input = "<think>\nline one\nline two\n</think>\n{\"triples\": []}";
        assert_eq!(strip_think_blocks(input), "{\"triples\": []}");
    }
}
