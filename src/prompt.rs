use base64::Engine as _;
use image::DynamicImage;
use serde_json::Value;

use crate::error::ResolveError;
use crate::fetch::ImageFetcher;
use crate::types::ContentPart;

/// 一次请求折叠出来的 prompt：最后一段文本 + 最后一张图
pub struct ResolvedPrompt {
    pub text: String,
    pub image: Option<DynamicImage>,
}

/// 把 messages 折叠成一个 prompt。
///
/// 按顺序遍历，后出现的文本 / 图片覆盖先出现的，历史对话不会保留。
/// 远程图片下载失败只记日志，当前图片被置空，请求退化为纯文本。
pub async fn resolve_messages(
    messages: &Value,
    fetcher: &dyn ImageFetcher,
) -> Result<ResolvedPrompt, ResolveError> {
    let messages = match messages.as_array() {
        Some(list) if !list.is_empty() => list,
        _ => return Err(ResolveError::NotAList),
    };

    // 文本部分原样保留 JSON 值，最后才检查是不是非空字符串
    let mut text: Option<Value> = None;
    let mut image: Option<DynamicImage> = None;

    for message in messages {
        let content = message
            .as_object()
            .and_then(|m| m.get("content"))
            .ok_or(ResolveError::MalformedMessage)?;

        match content {
            Value::String(_) => text = Some(content.clone()),
            Value::Array(items) => {
                for item in items.iter().filter(|item| item.is_object()) {
                    let Ok(part) = serde_json::from_value::<ContentPart>(item.clone()) else {
                        continue;
                    };
                    match part {
                        ContentPart::Text { text: t } => text = t,
                        ContentPart::ImageUrl { image_url } => {
                            if let Some(url) = image_url_of(image_url.as_ref())? {
                                image = load_image(url, fetcher).await?;
                            }
                        }
                        ContentPart::Other => {}
                    }
                }
            }
            _ => {}
        }
    }

    match text {
        Some(Value::String(text)) if !text.is_empty() => Ok(ResolvedPrompt { text, image }),
        Some(value) if !is_falsy(&value) => Err(ResolveError::NonStringText),
        _ => Err(ResolveError::MissingText),
    }
}

/// `image_url.url`。`image_url` 缺失时视为空对象；`url` 缺失或为假值返回 None。
fn image_url_of(image_url: Option<&Value>) -> Result<Option<&str>, ResolveError> {
    let Some(image_url) = image_url else {
        return Ok(None);
    };
    let object = image_url
        .as_object()
        .ok_or(ResolveError::MalformedImageUrl)?;
    match object.get("url") {
        None => Ok(None),
        Some(url) if is_falsy(url) => Ok(None),
        Some(Value::String(url)) => Ok(Some(url)),
        Some(_) => Err(ResolveError::NonStringUrl),
    }
}

async fn load_image(
    url: &str,
    fetcher: &dyn ImageFetcher,
) -> Result<Option<DynamicImage>, ResolveError> {
    if url.starts_with("data:image") {
        return decode_data_uri(url).map(Some);
    }
    match fetcher.fetch(url).await {
        Ok(image) => Ok(Some(image)),
        Err(e) => {
            tracing::error!("Error loading image from URL: {e}");
            Ok(None)
        }
    }
}

/// `data:image/png;base64,<payload>`：以第一个逗号切分，后半部分按 base64 解码。
///
/// base64 字母表以外的字符（换行、空格等）先丢掉，按 MIME 折行的 payload 也能解开。
pub fn decode_data_uri(uri: &str) -> Result<DynamicImage, ResolveError> {
    let (_, payload) = uri
        .split_once(',')
        .ok_or(ResolveError::DataUriWithoutPayload)?;
    let cleaned: Vec<u8> = payload
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// JSON 值的真假：null、false、0、空字符串、空数组、空对象都算假
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
