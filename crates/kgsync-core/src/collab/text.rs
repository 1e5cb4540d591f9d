//! Text services: tokenization for index fields and embeddings

use async_trait::async_trait;

use crate::error::Result;

/// Produces the space-separated token strings stored in index fields
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> String;

    /// Finer split of an already tokenized string
    fn fine_grained_tokenize(&self, tokens: &str) -> String;
}

/// Lowercased alphanumeric words
///
/// The fine-grained form also splits words at letter/digit boundaries, so
/// `gpt4o` yields `gpt 4 o`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> String {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn fine_grained_tokenize(&self, tokens: &str) -> String {
        let mut out: Vec<String> = Vec::new();
        for word in tokens.split_whitespace() {
            let mut current = String::new();
            let mut digits = None;
            for c in word.chars() {
                let is_digit = c.is_ascii_digit();
                if digits.is_some_and(|d| d != is_digit) {
                    out.push(std::mem::take(&mut current));
                }
                digits = Some(is_digit);
                current.push(c);
            }
            if !current.is_empty() {
                out.push(current);
            }
        }
        out.join(" ")
    }
}

/// Dense vector model handed to collaborators that index entities
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
