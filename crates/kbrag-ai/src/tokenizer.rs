//! Token 计数与截断

use kbrag_core::{KbRagError, Result};
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Token 计数器 Trait
pub trait TokenCounter: Send + Sync {
    /// 计算文本的 token 数量
    fn count(&self, text: &str) -> usize;

    /// 截断文本，使其不超过 `max_tokens` 个 token
    fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

/// 简单 Token 计数器 (基于字符估算)
pub struct SimpleTokenCounter;

impl SimpleTokenCounter {
    pub fn new() -> Self {
        Self
    }

    fn is_cjk(c: char) -> bool {
        matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{AC00}'..='\u{D7AF}' | '\u{3040}'..='\u{30FF}')
    }

    /// 单个字符的 token 权重: CJK 约 1.5 字符 = 1 token，其他约 4 字符 = 1 token
    fn weight(c: char) -> f32 {
        if Self::is_cjk(c) { 1.0 / 1.5 } else { 0.25 }
    }
}

impl Default for SimpleTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for SimpleTokenCounter {
    fn count(&self, text: &str) -> usize {
        let total: f32 = text.chars().map(Self::weight).sum();
        total.ceil() as usize
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let budget = max_tokens as f32;
        let mut used = 0.0;
        let mut end = 0;
        for (idx, c) in text.char_indices() {
            used += Self::weight(c);
            if used > budget {
                return text[..end].to_string();
            }
            end = idx + c.len_utf8();
        }
        text.to_string()
    }
}

/// Tiktoken 计数器 (实际使用 tiktoken-rs)
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn new(encoder: &str) -> Result<Self> {
        let bpe = match encoder {
            "o200k_base" => o200k_base(),
            _ => cl100k_base(),
        }
        .map_err(|e| KbRagError::TokenCount(format!("加载分词器失败: {}", e)))?;

        Ok(Self { bpe })
    }

    pub fn for_model(model: &str) -> Result<Self> {
        let encoder = if model.starts_with("gpt-4o") || model.starts_with("o1") {
            "o200k_base"
        } else {
            "cl100k_base"
        };
        Self::new(encoder)
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        // 截断点可能落在多字节字符中间，逐步回退直到能解码
        let mut cut = max_tokens;
        while cut > 0 {
            if let Ok(decoded) = self.bpe.decode(tokens[..cut].to_vec()) {
                return decoded;
            }
            cut -= 1;
        }
        String::new()
    }
}

/// 创建 Token 计数器
///
/// 精确分词器加载失败时退回字符估算
pub fn create_token_counter(use_accurate: bool, model: &str) -> Box<dyn TokenCounter> {
    if use_accurate {
        match TiktokenCounter::for_model(model) {
            Ok(counter) => return Box::new(counter),
            Err(e) => tracing::warn!("{}，改用字符估算", e),
        }
    }
    Box::new(SimpleTokenCounter::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_counter() {
        let counter = SimpleTokenCounter::new();

        assert!(counter.count("Hello, this is a test message for token counting.") > 0);
        assert!(counter.count("这是一个中文测试消息") > 0);
        assert!(counter.count("질문에 답해줘") > 0);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_simple_truncate_respects_char_boundaries() {
        let counter = SimpleTokenCounter::new();
        let text = "가나다라마바사아자차";
        let truncated = counter.truncate(text, 2);
        assert!(!truncated.is_empty());
        assert!(truncated.chars().count() <= 3);
        assert!(text.starts_with(&truncated));
        assert_eq!(counter.truncate("abcd", 10), "abcd");
        assert_eq!(counter.truncate("abcdefgh", 1), "abcd");
    }

    #[test]
    fn test_tiktoken_truncate() {
        let counter = TiktokenCounter::for_model("text-embedding-3-small").unwrap();
        let text = "Agentic loops plan, act and observe. ".repeat(50);

        let truncated = counter.truncate(&text, 16);
        assert!(counter.count(&truncated) <= 16);
        assert!(text.starts_with(&truncated));
        assert_eq!(counter.truncate("short text", 100), "short text");
    }

    #[test]
    fn test_create_token_counter() {
        let counter = create_token_counter(false, "gpt-4");
        assert!(counter.count("Hello, world!") > 0);

        let counter = create_token_counter(true, "gpt-4o");
        assert!(counter.count("Hello, world!") > 0);
    }
}
