//! 通用工具函数

use uuid::Uuid;

/// OID 的 URN 前缀
pub const OID_URN_PREFIX: &str = "urn:oid:";

/// 生成FHIR资源的内部ID
pub fn generate_resource_id() -> String {
    Uuid::new_v4().to_string()
}

/// 把 DICOM UID 包装为 `urn:oid:` 形式，不做格式校验
pub fn oid_urn(uid: &str) -> String {
    format!("{}{}", OID_URN_PREFIX, uid)
}
