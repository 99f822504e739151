//! 模型输出的容错解析
//!
//! 模型经常在 JSON 外面包一层代码块或说明文字，这里依次尝试：
//! 整段解析、```json 代码块、文本中第一个配平的 `{...}`。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EvaluationResult, Plan};

/// Planner 最多保留的查询数
pub const MAX_PLANNER_QUERIES: usize = 3;

/// 解析结果: 成功解析，或由原文构造的兜底值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Parsed<T> {
    Parsed(T),
    Fallback { raw: String, value: T },
}

impl<T> Parsed<T> {
    pub fn value(&self) -> &T {
        match self {
            Parsed::Parsed(value) | Parsed::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Parsed::Parsed(value) | Parsed::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Parsed::Fallback { .. })
    }
}

/// 从模型输出中提取第一个 JSON 对象
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Some(value) = parse_object(fenced) {
            return Some(value);
        }
    }

    let mut offset = 0;
    while let Some(start) = trimmed[offset..].find('{') {
        let start = offset + start;
        if let Some(end) = balanced_end(&trimmed[start..]) {
            if let Some(value) = parse_object(&trimmed[start..start + end]) {
                return Some(value);
            }
        }
        offset = start + 1;
    }

    None
}

fn parse_object(s: &str) -> Option<Value> {
    serde_json::from_str::<Value>(s.trim())
        .ok()
        .filter(Value::is_object)
}

/// ``` 代码块内容，忽略语言标记
fn fenced_block(s: &str) -> Option<&str> {
    let start = s.find("```")? + 3;
    let rest = &s[start..];
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// 从 `{` 开始找到配平的 `}`，返回结束位置 (不含)
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    extract_json_object(raw).and_then(|v| serde_json::from_value(v).ok())
}

fn clean_queries(queries: Vec<String>, limit: Option<usize>) -> Vec<String> {
    let cleaned = queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    match limit {
        Some(n) => cleaned.take(n).collect(),
        None => cleaned.collect(),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct PlanWire {
    #[serde(default)]
    plan: String,
    #[serde(default = "default_true")]
    need_retrieval: bool,
    #[serde(default)]
    queries: Vec<String>,
}

#[derive(Deserialize)]
struct EvaluationWire {
    sufficient: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    followup_queries: Vec<String>,
}

/// 解析 Planner 输出，失败时退回 "需要检索、无查询"
pub fn parse_plan(raw: &str) -> Parsed<Plan> {
    match decode::<PlanWire>(raw) {
        Some(wire) => Parsed::Parsed(Plan {
            plan: wire.plan,
            need_retrieval: wire.need_retrieval,
            queries: clean_queries(wire.queries, Some(MAX_PLANNER_QUERIES)),
        }),
        None => Parsed::Fallback {
            raw: raw.to_string(),
            value: Plan {
                plan: raw.to_string(),
                need_retrieval: true,
                queries: Vec::new(),
            },
        },
    }
}

/// 解析 Evaluator 输出，失败时判为不充分且无追加查询
pub fn parse_evaluation(raw: &str) -> Parsed<EvaluationResult> {
    match decode::<EvaluationWire>(raw) {
        Some(wire) => Parsed::Parsed(EvaluationResult {
            sufficient: wire.sufficient,
            reason: wire.reason,
            followup_queries: clean_queries(wire.followup_queries, None),
        }),
        None => Parsed::Fallback {
            raw: raw.to_string(),
            value: EvaluationResult {
                sufficient: false,
                reason: raw.to_string(),
                followup_queries: Vec::new(),
            },
        },
    }
}
