//! 字段映射
//!
//! 把单个DICOM原始值转换为FHIR文档片段。所有函数都是纯函数，
//! 输入缺失时返回 `None`，不会报错。

use chrono::{NaiveDate, NaiveTime};
use dicom2fhir_core::utils::oid_urn;
use dicom2fhir_core::{
    AdministrativeGender, CodeableConcept, Coding, FhirDateTime, HumanName, Identifier, Patient,
};
use dicom2fhir_dicom::CodedEntry;

/// HL7 v2-0203 标识符类型编码系统
pub const TERMINOLOGY_CODING_SYS: &str = "http://terminology.hl7.org/CodeSystem/v2-0203";
/// 检查号类型编码
pub const TERMINOLOGY_CODING_SYS_CODE_ACCESSION: &str = "ACSN";
/// 病历号类型编码
pub const TERMINOLOGY_CODING_SYS_CODE_MRN: &str = "MR";
/// DICOM 采集模态本体
pub const ACQUISITION_MODALITY_SYS: &str = "http://dicom.nema.org/resources/ontology/DCM";
/// SOP类编码系统
pub const SOP_CLASS_SYS: &str = "urn:ietf:rfc:3986";
/// 检查实例UID标识符系统
pub const DICOM_UID_SYS: &str = "urn:dicom:uid";
/// 内联患者资源ID
pub const INLINE_PATIENT_ID: &str = "patient.contained.inline";

fn identifier_type(code: &str) -> CodeableConcept {
    CodeableConcept {
        coding: vec![Coding {
            system: Some(TERMINOLOGY_CODING_SYS.to_string()),
            code: Some(code.to_string()),
            ..Default::default()
        }],
        text: None,
    }
}

/// 检查号标识符
pub fn accession_identifier(accession_number: &str) -> Identifier {
    Identifier {
        use_: Some("usual".to_string()),
        type_: Some(identifier_type(TERMINOLOGY_CODING_SYS_CODE_ACCESSION)),
        system: None,
        value: Some(accession_number.to_string()),
    }
}

/// 检查实例UID标识符
pub fn study_instance_uid_identifier(uid: &str) -> Identifier {
    Identifier {
        use_: None,
        type_: None,
        system: Some(DICOM_UID_SYS.to_string()),
        value: Some(oid_urn(uid)),
    }
}

/// 患者病历号标识符，签发机构为空时仍保留 `urn:oid:` 前缀
pub fn patient_identifier(patient_id: &str, issuer: &str) -> Identifier {
    Identifier {
        use_: Some("usual".to_string()),
        type_: Some(identifier_type(TERMINOLOGY_CODING_SYS_CODE_MRN)),
        system: Some(oid_urn(issuer)),
        value: Some(patient_id.to_string()),
    }
}

/// 性别映射，大小写不敏感
pub fn calc_gender(gender: Option<&str>) -> AdministrativeGender {
    match gender.map(|g| g.trim().to_ascii_lowercase()).as_deref() {
        Some("f") => AdministrativeGender::Female,
        Some("m") => AdministrativeGender::Male,
        Some("o") => AdministrativeGender::Other,
        _ => AdministrativeGender::Unknown,
    }
}

/// 解析 `YYYYMMDD` 格式日期
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// 出生日期，空或格式错误时为 None
pub fn calc_dob(dicom_dob: Option<&str>) -> Option<NaiveDate> {
    dicom_dob.and_then(parse_dicom_date)
}

/// 由DICOM日期和可选时间构造开始时间
///
/// 时间不足6位时只保留日期；否则只取前6位 `HHMMSS`，忽略小数秒和时区。
pub fn gen_started_datetime(date: Option<&str>, time: Option<&str>) -> Option<FhirDateTime> {
    let date = parse_dicom_date(date?)?;
    let time = match time.map(str::trim) {
        Some(t) if t.len() >= 6 => t,
        _ => return Some(FhirDateTime::Date(date)),
    };
    let hms = time.get(0..6)?;
    let time = NaiveTime::parse_from_str(hms, "%H%M%S").ok()?;
    Some(FhirDateTime::DateTime(date.and_time(time)))
}

/// DICOM人名 (姓^名^...) 转为 HumanName
pub fn gen_human_name(person_name: &str) -> HumanName {
    let mut components = person_name.split('^').map(str::trim);
    let family = components.next().filter(|s| !s.is_empty()).map(str::to_string);
    let given = components
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();

    HumanName {
        use_: Some("official".to_string()),
        family,
        given,
    }
}

/// 患者原始属性
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientFields<'a> {
    pub patient_id: Option<&'a str>,
    pub issuer: Option<&'a str>,
    pub name: Option<&'a str>,
    pub sex: Option<&'a str>,
    pub birth_date: Option<&'a str>,
}

/// 内联患者资源
pub fn inline_patient_resource(reference_id: &str, fields: PatientFields<'_>) -> Patient {
    let identifier = fields
        .patient_id
        .map(|id| vec![patient_identifier(id, fields.issuer.unwrap_or(""))])
        .unwrap_or_default();
    let name = fields.name.map(|n| vec![gen_human_name(n)]).unwrap_or_default();

    Patient {
        id: reference_id.to_string(),
        active: true,
        identifier,
        name,
        gender: calc_gender(fields.sex),
        birth_date: calc_dob(fields.birth_date),
    }
}

fn entry_coding(entry: &CodedEntry) -> Coding {
    Coding {
        system: entry.system.clone(),
        code: entry.code.clone(),
        display: entry.display.clone(),
        user_selected: None,
    }
}

/// 操作编码数组，输入为空时返回 None
pub fn gen_procedurecode_array(procedures: Option<&[CodedEntry]>) -> Option<Vec<CodeableConcept>> {
    let concepts: Vec<_> = procedures?
        .iter()
        .map(|p| CodeableConcept {
            coding: vec![entry_coding(p)],
            text: p.display.clone(),
        })
        .collect();

    if concepts.is_empty() {
        None
    } else {
        Some(concepts)
    }
}

/// 申请原因
///
/// 有编码时每个编码生成一个概念；没有编码但有文本时生成一个纯文本概念。
pub fn gen_reason(
    reasons: Option<&[CodedEntry]>,
    reason_text: Option<&str>,
) -> Option<Vec<CodeableConcept>> {
    match reasons {
        Some(entries) if !entries.is_empty() => Some(
            entries
                .iter()
                .map(|r| CodeableConcept {
                    coding: vec![entry_coding(r)],
                    text: None,
                })
                .collect(),
        ),
        _ => reason_text.map(|text| {
            vec![CodeableConcept {
                coding: Vec::new(),
                text: Some(text.to_string()),
            }]
        }),
    }
}

/// 模态编码，不校验模态值
pub fn gen_modality_coding(modality: &str) -> Coding {
    Coding {
        system: Some(ACQUISITION_MODALITY_SYS.to_string()),
        code: Some(modality.to_string()),
        ..Default::default()
    }
}

/// SOP类编码
pub fn gen_instance_sopclass(sop_class_uid: &str) -> Coding {
    Coding {
        system: Some(SOP_CLASS_SYS.to_string()),
        code: Some(oid_urn(sop_class_uid)),
        ..Default::default()
    }
}

/// 纯文本编码，userSelected 标记其不是术语值
pub fn gen_coding_text_only(text: &str) -> Coding {
    Coding {
        system: None,
        code: Some(text.to_string()),
        display: None,
        user_selected: Some(true),
    }
}
