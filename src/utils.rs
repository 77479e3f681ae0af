use std::path::Path;
use std::str::FromStr;

use anyhow::{Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indicatif::ProgressStyle;
use regex::Regex;

/// 默认允许的图片后缀
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png";

/// 图片后缀白名单，大小写不敏感
#[derive(Debug, Clone)]
pub struct SuffixFilter(Regex);

impl SuffixFilter {
    /// 从逗号分隔的后缀列表构建，例如 `jpg,jpeg,png`
    pub fn new(suffix: &str) -> Result<Self> {
        let alternatives = suffix
            .split(',')
            .map(|s| s.trim().trim_start_matches('.'))
            .filter(|s| !s.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>();
        if alternatives.is_empty() {
            bail!("后缀列表不能为空: {:?}", suffix);
        }
        let re = Regex::new(&format!("(?i)^({})$", alternatives.join("|")))?;
        Ok(Self(re))
    }

    /// 判断路径（或文件名）的后缀是否在白名单中
    pub fn is_match(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref()
            .extension()
            .is_some_and(|ext| self.0.is_match(&ext.to_string_lossy()))
    }
}

impl Default for SuffixFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX).expect("failed to build regex")
    }
}

impl FromStr for SuffixFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// 根据后缀推断图片的 MIME 类型，无法判断时视为 png
pub fn guess_mime(path: impl AsRef<Path>) -> &'static str {
    let ext = path.as_ref().extension().map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// 编码为 `data:<mime>;base64,<payload>`
pub fn to_data_uri(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(data))
}

/// 解码 base64 图片，允许带有 data URI 前缀，忽略其中的换行与空白
pub fn decode_base64_image(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let s = s.trim();
    let payload = match s.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
        Some((_, payload)) => payload,
        None => s,
    };
    let payload = payload.bytes().filter(|b| !b.is_ascii_whitespace()).collect::<Vec<_>>();
    STANDARD.decode(payload)
}

/// 清理上传的文件名，只保留最后一级路径中的 `[A-Za-z0-9._-]`
///
/// 清理后为空时返回 `None`
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>();
    let cleaned = cleaned.trim_matches(['.', '_']);
    if cleaned.is_empty() { None } else { Some(cleaned.to_owned()) }
}

/// 上传图片的保存名，格式为 `<id>_<清理后的文件名>.<后缀>`
///
/// 后缀单独保留，文件名部分清理后为空时只使用 `<id>.<后缀>`
pub fn upload_file_name(name: &str, id: &str) -> String {
    let name = Path::new(name.rsplit(['/', '\\']).next().unwrap_or_default());
    let stem = name.file_stem().and_then(|stem| sanitize_file_name(&stem.to_string_lossy()));
    let ext = name
        .extension()
        .map(|ext| ext.to_string_lossy().chars().filter(char::is_ascii_alphanumeric).collect::<String>())
        .unwrap_or_default();
    let mut saved = match stem {
        Some(stem) => format!("{}_{}", id, stem),
        None => id.to_owned(),
    };
    if !ext.is_empty() {
        saved.push('.');
        saved.push_str(&ext);
    }
    saved
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {wide_bar:.cyan/blue} {pos:>7}/{len:7} {msg}",
    )
    .expect("invalid progress bar template")
    .progress_chars("##-")
}
