//! # DICOM解码模块
//!
//! 把DICOM文件解码为转换器使用的扁平元数据记录。

pub mod codes;
pub mod parser;

pub use codes::CodedEntry;
pub use parser::{DicomParser, ParsedDicomObject};
