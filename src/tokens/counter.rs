//! Token counter implementations.

/// Estimates token counts for vendors that do not report usage.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Estimated tokens for one prompt/response exchange.
    fn count_exchange(&self, prompt: &str, output: &str) -> u64 {
        (self.count(prompt) + self.count(output)) as u64
    }
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_counting() {
        let c = WhitespaceCounter;
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("  Hello,\n  world!\t"), 2);
        assert_eq!(c.count_exchange("Write a haiku", "Leaves fall softly now"), 7);
    }
}
