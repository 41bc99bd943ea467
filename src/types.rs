use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::settings::SERVED_MODEL_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub engine: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn served() -> Self {
        Self {
            object: "list".to_string(),
            data: vec![ModelCard {
                id: SERVED_MODEL_NAME.to_string(),
                object: "model".to_string(),
                owned_by: "local".to_string(),
            }],
        }
    }
}

/// `content` 为数组时的一个元素。未知 `type` 落到 `Other`，直接忽略。
///
/// 字段保留原始 JSON 值，类型检查留给消息折叠。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: Option<Value>,
    },
    ImageUrl {
        // 显式的 null 要和缺失区分开
        #[serde(default, deserialize_with = "present")]
        image_url: Option<Value>,
    },
    #[serde(other)]
    Other,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// 用量统计从不计算，固定为 0
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
}

impl ChatCompletionResponse {
    pub fn new(answer: String, created: u64) -> Self {
        Self {
            id: format!("chatcmpl-{created}"),
            object: "chat.completion".to_string(),
            created,
            model: SERVED_MODEL_NAME.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: answer,
                },
                finish_reason: "stop".to_string(),
            }],
            usage: ChatUsage::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_matches_chat_completion_shape() {
        let resp = ChatCompletionResponse::new("hi".to_string(), 1_700_000_000);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "chatcmpl-1700000000",
                "object": "chat.completion",
                "created": 1_700_000_000u64,
                "model": "llava-v1.6-mistral-7b",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "hi"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}
            })
        );
    }

    #[test]
    fn content_parts_tolerate_unknown_types() {
        let parts: Vec<ContentPart> = serde_json::from_value(json!([
            {"type": "text", "text": "hello"},
            {"type": "input_audio", "input_audio": {}},
            {"type": "text"},
        ]))
        .unwrap();
        assert!(matches!(&parts[0], ContentPart::Text { text: Some(t) } if t == "hello"));
        assert!(matches!(parts[1], ContentPart::Other));
        assert!(matches!(parts[2], ContentPart::Text { text: None }));
    }

    #[test]
    fn content_parts_keep_raw_values() {
        let parts: Vec<ContentPart> = serde_json::from_value(json!([
            {"type": "text", "text": 123},
            {"type": "image_url", "image_url": null},
            {"type": "image_url"},
        ]))
        .unwrap();
        assert!(matches!(&parts[0], ContentPart::Text { text: Some(t) } if t == &json!(123)));
        assert!(matches!(&parts[1], ContentPart::ImageUrl { image_url: Some(Value::Null) }));
        assert!(matches!(parts[2], ContentPart::ImageUrl { image_url: None }));
    }
}
