//! DICOM编码序列提取
//!
//! 代码序列 (Code Sequence) 中的每个条目按固定标签读取
//! CodeValue / CodingSchemeDesignator / CodeMeaning。

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use serde::{Deserialize, Serialize};

/// 编码序列中的一个条目
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedEntry {
    /// CodeValue (0008,0100)
    pub code: Option<String>,
    /// CodingSchemeDesignator (0008,0102)
    pub system: Option<String>,
    /// CodeMeaning (0008,0104)
    pub display: Option<String>,
}

/// 从序列条目中提取编码三元组
pub fn coded_entries(items: &[InMemDicomObject]) -> Vec<CodedEntry> {
    items
        .iter()
        .map(|item| CodedEntry {
            code: item_text(item, tags::CODE_VALUE),
            system: item_text(item, tags::CODING_SCHEME_DESIGNATOR),
            display: item_text(item, tags::CODE_MEANING),
        })
        .collect()
}

/// 读取对象中指定的编码序列；序列不存在时返回 None
pub fn sequence_entries(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<CodedEntry>> {
    obj.element(tag)
        .ok()
        .and_then(|element| element.items())
        .map(coded_entries)
}

/// 序列第一个条目的 CodeMeaning
pub fn first_code_meaning(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|element| element.items())
        .and_then(|items| items.first())
        .and_then(|item| item_text(item, tags::CODE_MEANING))
}

pub(crate) fn item_text(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| clean_text(&value))
        .filter(|value| !value.is_empty())
}

/// 去掉首尾空白和UID的空字节填充
pub(crate) fn clean_text(value: &str) -> String {
    value.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string()
}
