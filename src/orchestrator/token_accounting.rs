/// Running token total for one turn.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TokenLedger {
    total: u64,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tokens: u64) {
        self.total = self.total.saturating_add(tokens);
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Pre-flight balance estimate for a message: half a token per character
/// plus a fixed overhead for the prompt and the answer.
pub fn estimate_turn_tokens(message: &str, overhead: u64) -> u64 {
    (message.chars().count() as u64)
        .div_ceil(2)
        .saturating_add(overhead)
}

/// Applies the pro-tier multiplier, rounding up.
pub fn apply_surcharge(total: u64, use_pro_model: bool, multiplier: f64) -> u64 {
    if !use_pro_model || multiplier <= 1.0 {
        return total;
    }
    (total as f64 * multiplier).ceil() as u64
}
