//! Rough token estimation backing `tool-output-max-tokens` truncation
//! decisions. Not meant to match any vendor's exact tokenizer — `cl100k_base`
//! is close enough across vendors for a truncation threshold.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

fn encoder() -> &'static CoreBPE {
    static ENCODER: OnceLock<CoreBPE> = OnceLock::new();
    ENCODER.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base encoder data is bundled with tiktoken-rs"))
}

pub fn count_tokens(text: &str) -> u32 {
    encoder().encode_with_special_tokens(text).len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_nonzero_tokens_for_nonempty_text() {
        assert!(count_tokens("hello, world") > 0);
        assert_eq!(count_tokens(""), 0);
    }
}
