//! DICOM数据解析器
//!
//! 读取DICOM文件并提取转换所需的元数据。每个属性都是显式的 `Option`，
//! 缺失或无法转换的属性为 `None`，
//! 解析过程不会因为单个属性出错而失败。

use crate::codes::{clean_text, first_code_meaning, item_text, sequence_entries, CodedEntry};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom2fhir_core::{ConvertError, Result};
use std::path::Path;
use tracing::debug;

/// DICOM数据解析器
pub struct DicomParser;

impl DicomParser {
    /// 解析DICOM文件
    ///
    /// 读取到像素数据之前即停止，文件句柄在返回前释放。
    pub fn parse_file<P: AsRef<Path>>(file_path: P) -> Result<ParsedDicomObject> {
        let file_path = file_path.as_ref();
        debug!("开始解析DICOM文件: {:?}", file_path);

        let obj = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(file_path)
            .map_err(|e| {
                debug!("DICOM文件解析失败: {:?}, 错误: {}", file_path, e);
                ConvertError::DicomParse(format!("无法解析DICOM文件 {:?}: {}", file_path, e))
            })?;

        let parsed = Self::extract_metadata(&obj);
        debug!("成功提取DICOM元数据: {}", parsed.get_summary());
        Ok(parsed)
    }

    /// 从DICOM对象中提取元数据
    pub fn extract_metadata(obj: &InMemDicomObject) -> ParsedDicomObject {
        ParsedDicomObject {
            // 患者信息
            patient_id: get_string_element(obj, tags::PATIENT_ID),
            issuer_of_patient_id: get_string_element(obj, tags::ISSUER_OF_PATIENT_ID),
            patient_name: get_string_element(obj, tags::PATIENT_NAME),
            patient_birth_date: get_string_element(obj, tags::PATIENT_BIRTH_DATE),
            patient_sex: get_string_element(obj, tags::PATIENT_SEX),

            // 检查信息
            study_instance_uid: get_string_element(obj, tags::STUDY_INSTANCE_UID),
            study_date: get_string_element(obj, tags::STUDY_DATE),
            study_time: get_string_element(obj, tags::STUDY_TIME),
            study_description: get_string_element(obj, tags::STUDY_DESCRIPTION),
            accession_number: get_string_element(obj, tags::ACCESSION_NUMBER),
            procedure_codes: sequence_entries(obj, tags::PROCEDURE_CODE_SEQUENCE),
            reason_codes: sequence_entries(obj, tags::REASON_FOR_REQUESTED_PROCEDURE_CODE_SEQUENCE),
            reason_text: get_string_element(obj, tags::REASON_FOR_THE_REQUESTED_PROCEDURE),

            // 序列信息
            series_instance_uid: get_string_element(obj, tags::SERIES_INSTANCE_UID),
            series_number: get_integer_element(obj, tags::SERIES_NUMBER),
            series_description: get_string_element(obj, tags::SERIES_DESCRIPTION),
            series_date: get_string_element(obj, tags::SERIES_DATE),
            series_time: get_string_element(obj, tags::SERIES_TIME),
            modality: get_string_element(obj, tags::MODALITY),
            body_part_examined: get_string_element(obj, tags::BODY_PART_EXAMINED),
            laterality: get_string_element(obj, tags::LATERALITY),

            // 实例信息
            sop_instance_uid: get_string_element(obj, tags::SOP_INSTANCE_UID),
            sop_class_uid: get_string_element(obj, tags::SOP_CLASS_UID),
            instance_number: get_integer_element(obj, tags::INSTANCE_NUMBER),
            image_type: get_multi_string_element(obj, tags::IMAGE_TYPE),
            concept_name: first_code_meaning(obj, tags::CONCEPT_NAME_CODE_SEQUENCE),
        }
    }
}

/// 获取字符串类型元素的值
fn get_string_element(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = item_text(obj, tag);
    if value.is_none() {
        debug!("未找到标签或值为空: {:?}", tag);
    }
    value
}

/// 获取多值字符串元素
fn get_multi_string_element(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<String>> {
    obj.element(tag)
        .ok()
        .and_then(|element| element.to_multi_str().ok())
        .map(|values| values.iter().map(|v| clean_text(v)).collect::<Vec<_>>())
        .filter(|values| !values.is_empty())
}

/// 获取整数类型元素的值 (IS / US / UL 等)
fn get_integer_element(obj: &InMemDicomObject, tag: Tag) -> Option<u32> {
    match obj.element(tag) {
        Ok(element) => match element.to_int::<u32>() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!("标签 {:?} 不是有效的非负整数", tag);
                None
            }
        },
        Err(_) => None,
    }
}

/// 解析后的DICOM对象
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDicomObject {
    // === 患者信息 ===
    /// 患者ID
    pub patient_id: Option<String>,
    /// 患者ID签发机构
    pub issuer_of_patient_id: Option<String>,
    /// 患者姓名 (PN格式: 姓^名^中间名^前缀^后缀)
    pub patient_name: Option<String>,
    /// 患者出生日期 (YYYYMMDD)
    pub patient_birth_date: Option<String>,
    /// 患者性别
    pub patient_sex: Option<String>,

    // === 检查信息 ===
    /// 检查实例UID
    pub study_instance_uid: Option<String>,
    /// 检查日期
    pub study_date: Option<String>,
    /// 检查时间
    pub study_time: Option<String>,
    /// 检查描述
    pub study_description: Option<String>,
    /// 检查号
    pub accession_number: Option<String>,
    /// 操作编码序列
    pub procedure_codes: Option<Vec<CodedEntry>>,
    /// 申请原因编码序列
    pub reason_codes: Option<Vec<CodedEntry>>,
    /// 申请原因文本
    pub reason_text: Option<String>,

    // === 序列信息 ===
    /// 序列实例UID
    pub series_instance_uid: Option<String>,
    /// 序列号
    pub series_number: Option<u32>,
    /// 序列描述
    pub series_description: Option<String>,
    /// 序列日期
    pub series_date: Option<String>,
    /// 序列时间
    pub series_time: Option<String>,
    /// 模态
    pub modality: Option<String>,
    /// 检查部位
    pub body_part_examined: Option<String>,
    /// 左右侧
    pub laterality: Option<String>,

    // === 实例信息 ===
    /// SOP实例UID
    pub sop_instance_uid: Option<String>,
    /// SOP类UID
    pub sop_class_uid: Option<String>,
    /// 实例号
    pub instance_number: Option<u32>,
    /// 图像类型 (多值)
    pub image_type: Option<Vec<String>>,
    /// 概念名称编码序列第一项的含义 (结构化报告标题)
    pub concept_name: Option<String>,
}

impl ParsedDicomObject {
    /// 获取DICOM对象的摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "DICOM对象: 患者ID={}, 检查UID={}, 序列UID={}, 实例UID={}, 模态={}",
            self.patient_id.as_deref().unwrap_or("未知"),
            self.study_instance_uid.as_deref().unwrap_or("未知"),
            self.series_instance_uid.as_deref().unwrap_or("未知"),
            self.sop_instance_uid.as_deref().unwrap_or("未知"),
            self.modality.as_deref().unwrap_or("未知")
        )
    }
}
