//! 错误定义模块

use thiserror::Error;

/// 转换器统一错误类型
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("DICOM解析错误: {0}")]
    DicomParse(String),

    #[error("缺少必要属性: {0}")]
    MissingAttribute(&'static str),

    /// 同一批次中出现了多个检查
    #[error("检查实例UID不一致: 期望 {expected}, 实际 {found}")]
    StudyMismatch { expected: String, found: String },

    #[error("目录遍历错误: {0}")]
    Walk(String),
}

impl ConvertError {
    /// 是否为需要中止整个批次的错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConvertError::StudyMismatch { .. })
    }
}

/// 转换器统一结果类型
pub type Result<T> = std::result::Result<T, ConvertError>;
