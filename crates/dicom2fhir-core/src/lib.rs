//! # dicom2fhir Core
//!
//! 转换器的核心模块，提供FHIR文档模型、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{ConvertError, Result};
pub use models::*;
