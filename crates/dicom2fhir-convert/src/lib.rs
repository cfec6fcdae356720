//! # DICOM到FHIR转换模块
//!
//! 提供完整的 ImagingStudy 转换流程，包括：
//! - 字段映射：单个DICOM值到FHIR片段的纯函数转换
//! - 检查聚合：把多个文件合并为检查 / 序列 / 实例树
//! - 批量转换：遍历目录并汇总为一个检查

pub mod aggregator;
pub mod batch;
pub mod mapper;

// 重新导出主要类型
pub use aggregator::{Ingested, StudyAggregator};
pub use batch::{collect_files, convert_directory, process_dicom_dir, BatchReport, BatchResult};
