//! Chat allowlist for the Telegram adapter.
//!
//! An empty `allowed_chat_ids` list means the bot answers every chat; a
//! non-empty list restricts it to exactly those chat ids.

pub fn is_allowed(allowed_chat_ids: &[i64], chat_id: i64) -> bool {
    allowed_chat_ids.is_empty() || allowed_chat_ids.contains(&chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_allows_everyone() {
        assert!(is_allowed(&[], 12345));
        assert!(is_allowed(&[], -987));
    }

    #[test]
    fn listed_chat_is_allowed() {
        assert!(is_allowed(&[111, 222], 111));
    }

    #[test]
    fn unlisted_chat_is_blocked() {
        assert!(!is_allowed(&[111, 222], 333));
    }
}
