use crate::model::Usage;

/// Tokenizer capability: how many tokens `text` costs under `model`.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str, model: &str) -> u32;
}

impl<F> TokenCounter for F
where
    F: Fn(&str, &str) -> u32 + Send + Sync,
{
    fn count_text(&self, text: &str, model: &str) -> u32 {
        self(text, model)
    }
}

/// Rough estimate of one token per four bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count_text(&self, text: &str, _model: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        ((text.len() / 4) as u32).max(1)
    }
}

/// Upstream usage is trusted unless it reports no tokens at all.
pub fn needs_recount(usage: &Usage) -> bool {
    usage.total_tokens == 0
}

/// Sum completion tokens over `texts` and derive the totals.
pub fn derive_usage<'a>(
    prompt_tokens: u32,
    texts: impl IntoIterator<Item = &'a str>,
    model: &str,
    counter: &dyn TokenCounter,
) -> Usage {
    let completion_tokens = texts
        .into_iter()
        .map(|t| counter.count_text(t, model))
        .sum::<u32>();
    Usage::new(prompt_tokens, completion_tokens, prompt_tokens + completion_tokens)
}
