//! Writing-style catalog and message augmentation.
//!
//! The catalog mirrors the frontend's style picker: each entry maps a style
//! name to a short description of its textual features. When a request names
//! a style, the feature description is appended to the user message before it
//! reaches the first model stage; older clients append the same suffix
//! themselves, so a strict fallback parser recovers the pair for logging.

use serde::Serialize;

/// Style name → feature description. Kept in sync with the frontend picker.
pub const WRITING_STYLES: &[(&str, &str)] = &[
    (
        "政务通报/汇报体",
        "语言严谨、结构规范、逻辑清晰、用词精准、客观陈述",
    ),
    (
        "内部参阅/简报体",
        "观点鲜明、分析深刻、篇幅精炼、问题导向、数据支撑",
    ),
    (
        "领导讲话/发言稿体",
        "结构庄重、气势恢宏、号召力强、排比对偶多",
    ),
    (
        "权威评论体 (新华时评风)",
        "高屋建瓴、观点鲜明、论证有力、引导舆论",
    ),
    (
        "深度报道/调查体",
        "叙事完整、细节丰富、逻辑严密、背景深远",
    ),
    (
        "标准消息/通稿体",
        "要素齐全（5W1H）、客观中立、倒金字塔结构",
    ),
    (
        "新闻特写/人物通讯体",
        "情感饱满、描写生动、故事性强、见微知著",
    ),
    (
        "宏观经济报道体",
        "(分析) 全局视角、数据驱动、政策敏感、趋势研判",
    ),
    (
        "社会民生报道体",
        "(关怀) 问题导向、政策关联、人文温度、建设性",
    ),
    (
        "红色纪念/党史评论体",
        "(论述) 以史鉴今、价值提炼、思想引领、语言庄重",
    ),
    (
        "新媒体解读/划重点体",
        "通俗易懂、口语化表达、善用问答和比喻、逻辑清晰",
    ),
    (
        "数据新闻/图解文案体",
        "语言精炼、数据驱动、结论清晰、适合可视化呈现",
    ),
];

const SUFFIX_START: &str = ",| ";
const FEATURES_SEP: &str = " | 核心特点：";

/// A resolved style selection, recorded alongside usage logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleInfo {
    pub style: String,
    pub features: String,
}

/// Look up the feature description for a style name.
pub fn features_for(style: &str) -> Option<&'static str> {
    WRITING_STYLES
        .iter()
        .find(|(name, _)| *name == style)
        .map(|(_, features)| *features)
}

/// Append the style suffix to a user message.
///
/// Returns the augmented message and the style pair for logging, or `None`
/// when the style name is not in the catalog (the caller proceeds with the
/// original message).
pub fn augment(message: &str, style: &str) -> Option<(String, StyleInfo)> {
    let features = features_for(style)?;
    let augmented = format!("{message}{SUFFIX_START}{style}{FEATURES_SEP}{features}");
    Some((
        augmented,
        StyleInfo {
            style: style.to_string(),
            features: features.to_string(),
        },
    ))
}

/// Parse a pre-augmented message from an older client.
///
/// Grammar: `<msg>,| <style> | 核心特点：<features>` — exactly what
/// [`augment`] emits. Returns the style pair for logging; the message itself
/// is left untouched (no re-augmentation). Anything not matching the grammar
/// is `None`.
pub fn parse_style_suffix(message: &str) -> Option<StyleInfo> {
    let (_, suffix) = message.rsplit_once(SUFFIX_START)?;
    let (style, features) = suffix.split_once(FEATURES_SEP)?;
    let style = style.trim();
    let features = features.trim();
    if style.is_empty() || features.is_empty() {
        return None;
    }
    Some(StyleInfo {
        style: style.to_string(),
        features: features.to_string(),
    })
}
