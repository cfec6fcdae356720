//! 批量转换
//!
//! 递归遍历输入目录，逐个解码文件并交给聚合器。无法解码的文件被跳过。
//! 第一个解码成功的文件确定检查实例UID，之后出现其他检查时整个批次中止。

use crate::aggregator::{Ingested, StudyAggregator};
use dicom2fhir_core::{ConvertError, ImagingStudy, Result};
use dicom2fhir_dicom::{DicomParser, ParsedDicomObject};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// 批次统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// 遍历到的普通文件数
    pub files_seen: usize,
    /// 成功加入检查的文件数
    pub ingested: usize,
    /// 跳过的文件数 (非DICOM或缺少必要属性)
    pub skipped: usize,
    /// 重复的SOP实例数
    pub duplicate_instances: usize,
}

/// 批次结果
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// 没有任何文件解码成功时为 None
    pub study: Option<ImagingStudy>,
    pub report: BatchReport,
}

/// 列出目录下所有普通文件 (递归，按文件名排序)
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConvertError::Walk(format!("输入路径不是目录: {:?}", dir)));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => warn!("目录遍历失败，已跳过: {}", e),
        }
    }
    Ok(files)
}

/// 转换一个目录
pub fn convert_directory(dir: &Path) -> Result<BatchResult> {
    let files = collect_files(dir)?;
    let endpoint = dir.display().to_string();
    info!("开始转换目录: {} ({} 个文件)", endpoint, files.len());

    let mut report = BatchReport {
        files_seen: files.len(),
        ..Default::default()
    };
    let mut study_key: Option<String> = None;
    let mut aggregator: Option<StudyAggregator> = None;

    for path in &files {
        let record = match DicomParser::parse_file(path) {
            Ok(record) => record,
            Err(e) => {
                debug!("跳过非DICOM文件 {:?}: {}", path, e);
                report.skipped += 1;
                continue;
            }
        };

        let outcome = claim_study_key(&mut study_key, &record)
            .and_then(|_| StudyAggregator::ingest(&mut aggregator, &record, &endpoint));

        match outcome {
            Ok(Ingested::DuplicateInstance) => report.duplicate_instances += 1,
            Ok(_) => report.ingested += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!("跳过文件 {:?}: {}", path, e);
                report.skipped += 1;
            }
        }
    }

    let study = aggregator.map(StudyAggregator::into_study);
    info!(
        "目录转换完成: 文件 {}, 加入 {}, 跳过 {}, 重复实例 {}",
        report.files_seen, report.ingested, report.skipped, report.duplicate_instances
    );
    Ok(BatchResult { study, report })
}

/// 第一个带检查实例UID的记录确定批次的检查，之后的记录必须一致
///
/// 在必要属性检查之前比较，被跳过的记录同样参与判断。
fn claim_study_key(study_key: &mut Option<String>, record: &ParsedDicomObject) -> Result<()> {
    let Some(found) = record.study_instance_uid.as_deref() else {
        return Ok(());
    };
    match study_key {
        Some(expected) if expected.as_str() != found => {
            error!("检测到多个检查: 期望 {}, 实际 {}", expected, found);
            Err(ConvertError::StudyMismatch {
                expected: expected.clone(),
                found: found.to_string(),
            })
        }
        Some(_) => Ok(()),
        None => {
            *study_key = Some(found.to_string());
            Ok(())
        }
    }
}

/// 转换一个目录，只返回检查
pub fn process_dicom_dir(dir: &Path) -> Result<Option<ImagingStudy>> {
    convert_directory(dir).map(|result| result.study)
}
