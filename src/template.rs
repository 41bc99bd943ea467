//! llava-v1.6-mistral 的单轮对话模板（Mistral `[INST] ... [/INST]` 格式）

/// 图片占位符，LLaVA 在 embedding 阶段把它替换成图片特征
pub const IMAGE_PLACEHOLDER: &str = "<image>";

/// 指令结束标记，解码结果里它之前的部分都是回显的 prompt
pub const INST_CLOSE: &str = "[/INST]";

const INST_OPEN: &str = "[INST]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnPart {
    Text(String),
    Image,
}

/// 只有一条 user 消息的对话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    parts: Vec<TurnPart>,
}

impl Conversation {
    pub fn text_only(text: &str) -> Self {
        Self {
            parts: vec![TurnPart::Text(text.to_string())],
        }
    }

    pub fn with_image(text: &str) -> Self {
        Self {
            parts: vec![TurnPart::Text(text.to_string()), TurnPart::Image],
        }
    }

    pub fn has_image(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, TurnPart::Image))
    }

    /// 套用模型的 chat template：图片占位符总是排在文本前面，
    /// 结尾带上生成提示（即 `[/INST]`）。
    pub fn render(&self) -> String {
        let mut out = format!("{INST_OPEN} ");
        for _ in self.parts.iter().filter(|p| matches!(p, TurnPart::Image)) {
            out.push_str(IMAGE_PLACEHOLDER);
            out.push('\n');
        }
        for part in &self.parts {
            if let TurnPart::Text(text) = part {
                out.push_str(text);
            }
        }
        out.push(' ');
        out.push_str(INST_CLOSE);
        out
    }
}

/// 去掉回显的 prompt：删掉最后一个 `[/INST]` 及其之前的全部内容，再去首尾空白。
/// 结果为空时原样返回解码文本。
pub fn clean_response(raw: &str) -> String {
    let stripped = match raw.rfind(INST_CLOSE) {
        Some(idx) => raw[idx + INST_CLOSE.len()..].trim(),
        None => raw.trim(),
    };
    if stripped.is_empty() {
        raw.to_string()
    } else {
        stripped.to_string()
    }
}
