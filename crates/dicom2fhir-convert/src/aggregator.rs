//! 检查聚合器
//!
//! 持有正在构建的 ImagingStudy 树，把逐个解码的DICOM记录合并为
//! 检查 / 序列 / 实例三层结构。序列和实例按UID索引查找，
//! 输出列表保持首次出现的顺序。

use crate::mapper::{self, PatientFields, INLINE_PATIENT_ID};
use dicom2fhir_core::utils::generate_resource_id;
use dicom2fhir_core::{
    ConvertError, ImagingStudy, ImagingStudyInstance, ImagingStudySeries, ImagingStudyStatus,
    Reference, Result,
};
use dicom2fhir_dicom::ParsedDicomObject;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, warn};

/// 结构化报告模态
const STRUCTURED_REPORT_MODALITY: &str = "SR";

/// 单条记录的摄入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// 新建了序列 (同时新建了实例)
    NewSeries,
    /// 在已有序列中新建了实例
    NewInstance,
    /// SOP实例UID在序列中已存在，记录被忽略
    DuplicateInstance,
}

/// 记录中定位树节点所需的属性
struct RecordKeys<'a> {
    study_uid: &'a str,
    series_uid: &'a str,
    sop_instance_uid: &'a str,
    sop_class_uid: &'a str,
    modality: &'a str,
}

impl<'a> RecordKeys<'a> {
    fn from_record(record: &'a ParsedDicomObject) -> Result<Self> {
        Ok(Self {
            study_uid: required(&record.study_instance_uid, "StudyInstanceUID")?,
            series_uid: required(&record.series_instance_uid, "SeriesInstanceUID")?,
            sop_instance_uid: required(&record.sop_instance_uid, "SOPInstanceUID")?,
            sop_class_uid: required(&record.sop_class_uid, "SOPClassUID")?,
            modality: required(&record.modality, "Modality")?,
        })
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str> {
    value.as_deref().ok_or(ConvertError::MissingAttribute(name))
}

/// 检查聚合器
#[derive(Debug)]
pub struct StudyAggregator {
    study_uid: String,
    study: ImagingStudy,
    /// 序列UID -> 在 `study.series` 中的位置
    series_index: HashMap<String, usize>,
    /// (序列UID, SOP实例UID)
    instance_index: HashSet<(String, String)>,
}

impl StudyAggregator {
    /// 由第一条记录创建检查，并立即把该记录加入序列层
    ///
    /// `endpoint` 为输入目录，写入 `file://` 端点引用。
    pub fn new(record: &ParsedDicomObject, endpoint: &str) -> Result<Self> {
        let keys = RecordKeys::from_record(record)?;

        let mut identifier = Vec::new();
        if let Some(accession) = record.accession_number.as_deref() {
            identifier.push(mapper::accession_identifier(accession));
        }
        identifier.push(mapper::study_instance_uid_identifier(keys.study_uid));

        let patient = mapper::inline_patient_resource(
            INLINE_PATIENT_ID,
            PatientFields {
                patient_id: record.patient_id.as_deref(),
                issuer: record.issuer_of_patient_id.as_deref(),
                name: record.patient_name.as_deref(),
                sex: record.patient_sex.as_deref(),
                birth_date: record.patient_birth_date.as_deref(),
            },
        );

        let study = ImagingStudy {
            id: generate_resource_id(),
            status: ImagingStudyStatus::Available,
            description: record.study_description.clone(),
            identifier,
            contained: vec![patient],
            subject: Reference::new(format!("#{}", INLINE_PATIENT_ID)),
            endpoint: vec![Reference::new(format!("file://{}", endpoint))],
            procedure_code: mapper::gen_procedurecode_array(record.procedure_codes.as_deref()),
            started: mapper::gen_started_datetime(
                record.study_date.as_deref(),
                record.study_time.as_deref(),
            ),
            reason_code: mapper::gen_reason(
                record.reason_codes.as_deref(),
                record.reason_text.as_deref(),
            ),
            modality: Vec::new(),
            number_of_series: 0,
            number_of_instances: 0,
            series: Vec::new(),
        };

        debug!("创建检查: {}", keys.study_uid);
        let mut aggregator = Self {
            study_uid: keys.study_uid.to_string(),
            study,
            series_index: HashMap::new(),
            instance_index: HashSet::new(),
        };
        aggregator.upsert_series(&keys, record);
        Ok(aggregator)
    }

    /// 摄入一条记录；没有现有检查时新建
    ///
    /// 出错时 `aggregator` 保持原样，调用方可以跳过该记录继续摄入。
    pub fn ingest(
        aggregator: &mut Option<Self>,
        record: &ParsedDicomObject,
        endpoint: &str,
    ) -> Result<Ingested> {
        match aggregator {
            Some(existing) => existing.add(record),
            None => {
                *aggregator = Some(Self::new(record, endpoint)?);
                Ok(Ingested::NewSeries)
            }
        }
    }

    /// 把记录加入现有检查
    ///
    /// 检查实例UID不一致时返回 [`ConvertError::StudyMismatch`]，树不被修改。
    pub fn add(&mut self, record: &ParsedDicomObject) -> Result<Ingested> {
        let study_uid = required(&record.study_instance_uid, "StudyInstanceUID")?;
        if study_uid != self.study_uid {
            error!(
                "检测到多个检查: 期望 {}, 实际 {}",
                self.study_uid, study_uid
            );
            return Err(ConvertError::StudyMismatch {
                expected: self.study_uid.clone(),
                found: study_uid.to_string(),
            });
        }

        let keys = RecordKeys::from_record(record)?;
        Ok(self.upsert_series(&keys, record))
    }

    fn upsert_series(&mut self, keys: &RecordKeys<'_>, record: &ParsedDicomObject) -> Ingested {
        if let Some(&position) = self.series_index.get(keys.series_uid) {
            return self.upsert_instance(position, keys, record);
        }

        let modality = mapper::gen_modality_coding(keys.modality);
        self.study.add_modality(&modality);

        // Laterality 存在时覆盖 BodyPartExamined
        let body_site = record
            .laterality
            .as_deref()
            .or(record.body_part_examined.as_deref())
            .map(mapper::gen_coding_text_only);

        let series = ImagingStudySeries {
            uid: keys.series_uid.to_string(),
            number: record.series_number,
            modality,
            description: record.series_description.clone(),
            number_of_instances: 0,
            body_site,
            started: mapper::gen_started_datetime(
                record.series_date.as_deref(),
                record.series_time.as_deref(),
            ),
            instance: Vec::new(),
        };

        let position = self.study.series.len();
        self.study.series.push(series);
        self.study.number_of_series += 1;
        self.series_index.insert(keys.series_uid.to_string(), position);
        debug!("新建序列: {} (模态 {})", keys.series_uid, keys.modality);

        self.upsert_instance(position, keys, record);
        Ingested::NewSeries
    }

    fn upsert_instance(
        &mut self,
        position: usize,
        keys: &RecordKeys<'_>,
        record: &ParsedDicomObject,
    ) -> Ingested {
        let instance_key = (keys.series_uid.to_string(), keys.sop_instance_uid.to_string());
        if !self.instance_index.insert(instance_key) {
            warn!(
                "SOP实例UID在序列中不唯一，已忽略: 序列 {}, 实例 {}",
                keys.series_uid, keys.sop_instance_uid
            );
            return Ingested::DuplicateInstance;
        }

        let series = &mut self.study.series[position];
        let title = instance_title(series, record);
        if title.is_none() {
            debug!("无法生成实例标题: {}", keys.sop_instance_uid);
        }

        series.instance.push(ImagingStudyInstance {
            uid: keys.sop_instance_uid.to_string(),
            sop_class: mapper::gen_instance_sopclass(keys.sop_class_uid),
            number: record.instance_number,
            title,
        });
        series.number_of_instances += 1;
        self.study.number_of_instances += 1;

        Ingested::NewInstance
    }

    /// 当前构建的检查
    pub fn study(&self) -> &ImagingStudy {
        &self.study
    }

    /// 结束聚合并返回检查
    pub fn into_study(self) -> ImagingStudy {
        self.study
    }
}

/// 实例标题：结构化报告取概念名称，其余取 ImageType 以反斜杠连接
fn instance_title(series: &ImagingStudySeries, record: &ParsedDicomObject) -> Option<String> {
    if series.modality.code.as_deref() == Some(STRUCTURED_REPORT_MODALITY) {
        record.concept_name.clone()
    } else {
        record.image_type.as_ref().map(|parts| parts.join("\\"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(study: &str, series: &str, instance: &str, modality: &str) -> ParsedDicomObject {
        ParsedDicomObject {
            patient_id: Some("PID42".to_string()),
            patient_name: Some("Doe^John".to_string()),
            patient_sex: Some("M".to_string()),
            patient_birth_date: Some("19800101".to_string()),
            study_instance_uid: Some(study.to_string()),
            accession_number: Some("ACC001".to_string()),
            study_date: Some("20230115".to_string()),
            study_time: Some("143000".to_string()),
            series_instance_uid: Some(series.to_string()),
            series_number: Some(1),
            modality: Some(modality.to_string()),
            sop_instance_uid: Some(instance.to_string()),
            sop_class_uid: Some("1.2.840.10008.5.1.4.1.1.1".to_string()),
            instance_number: Some(1),
            image_type: Some(vec!["ORIGINAL".to_string(), "PRIMARY".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_record_builds_study() {
        let mut first = record("1.2.3", "1.2.3.1", "1.2.3.1.1", "CR");
        first.body_part_examined = Some("CHEST".to_string());
        let aggregator = StudyAggregator::new(&first, "/data/study").unwrap();
        let study = aggregator.study();

        assert_eq!(study.status, ImagingStudyStatus::Available);
        assert_eq!(study.number_of_series, 1);
        assert_eq!(study.number_of_instances, 1);
        assert_eq!(study.modality.len(), 1);
        assert_eq!(study.modality[0].code.as_deref(), Some("CR"));
        assert_eq!(study.endpoint[0].reference, "file:///data/study");
        assert_eq!(study.subject.reference, "#patient.contained.inline");
        assert_eq!(study.identifier.len(), 2);
        assert_eq!(study.identifier[1].value.as_deref(), Some("urn:oid:1.2.3"));

        let series = &study.series[0];
        let body_site = series.body_site.as_ref().unwrap();
        assert_eq!(body_site.code.as_deref(), Some("CHEST"));
        assert_eq!(body_site.user_selected, Some(true));
        assert_eq!(series.instance.len(), 1);
        assert_eq!(series.instance[0].title.as_deref(), Some("ORIGINAL\\PRIMARY"));
        assert_eq!(
            series.instance[0].sop_class.code.as_deref(),
            Some("urn:oid:1.2.840.10008.5.1.4.1.1.1")
        );
    }

    #[test]
    fn test_counts_hold_after_every_step() {
        let mut aggregator: Option<StudyAggregator> = None;
        let inputs = [
            ("1.2.3.1", "a"),
            ("1.2.3.1", "b"),
            ("1.2.3.2", "c"),
            ("1.2.3.1", "a"),
            ("1.2.3.3", "d"),
            ("1.2.3.2", "e"),
        ];
        for (series, instance) in inputs {
            let rec = record("1.2.3", series, instance, "CT");
            StudyAggregator::ingest(&mut aggregator, &rec, "/data").unwrap();
            assert!(aggregator.as_ref().unwrap().study().counts_consistent());
        }

        let study = aggregator.unwrap().into_study();
        assert_eq!(study.number_of_series, 3);
        assert_eq!(study.number_of_instances, 5);
    }

    #[test]
    fn test_duplicate_instance_is_skipped() {
        let rec = record("1.2.3", "1.2.3.1", "1.2.3.1.1", "CR");
        let mut aggregator = StudyAggregator::new(&rec, "/data").unwrap();

        let outcome = aggregator.add(&rec).unwrap();
        assert_eq!(outcome, Ingested::DuplicateInstance);
        assert_eq!(aggregator.study().number_of_instances, 1);
        assert_eq!(aggregator.study().series[0].number_of_instances, 1);
        assert_eq!(aggregator.study().series[0].instance.len(), 1);
    }

    #[test]
    fn test_same_instance_uid_in_other_series_is_kept() {
        let mut aggregator =
            StudyAggregator::new(&record("1.2.3", "1.2.3.1", "x", "CR"), "/data").unwrap();
        let outcome = aggregator.add(&record("1.2.3", "1.2.3.2", "x", "CR")).unwrap();

        assert_eq!(outcome, Ingested::NewSeries);
        assert_eq!(aggregator.study().number_of_instances, 2);
    }

    #[test]
    fn test_study_mismatch_leaves_tree_untouched() {
        let mut aggregator =
            StudyAggregator::new(&record("1.2.3", "1.2.3.1", "a", "CR"), "/data").unwrap();
        let result = aggregator.add(&record("9.9.9", "9.9.9.1", "b", "CR"));

        match result {
            Err(ConvertError::StudyMismatch { expected, found }) => {
                assert_eq!(expected, "1.2.3");
                assert_eq!(found, "9.9.9");
            }
            other => panic!("expected study mismatch, got {:?}", other),
        }
        assert_eq!(aggregator.study().number_of_series, 1);
        assert_eq!(aggregator.study().number_of_instances, 1);
    }

    #[test]
    fn test_missing_required_attribute() {
        let mut rec = record("1.2.3", "1.2.3.1", "a", "CR");
        rec.modality = None;
        assert!(matches!(
            StudyAggregator::new(&rec, "/data"),
            Err(ConvertError::MissingAttribute("Modality"))
        ));

        let mut aggregator =
            StudyAggregator::new(&record("1.2.3", "1.2.3.1", "a", "CR"), "/data").unwrap();
        let mut no_sop = record("1.2.3", "1.2.3.1", "b", "CR");
        no_sop.sop_instance_uid = None;
        assert!(matches!(
            aggregator.add(&no_sop),
            Err(ConvertError::MissingAttribute("SOPInstanceUID"))
        ));
        assert_eq!(aggregator.study().number_of_instances, 1);
    }

    #[test]
    fn test_ingest_keeps_tree_on_recoverable_error() {
        let mut aggregator = None;
        let first = record("1.2.3", "1.2.3.1", "a", "CR");
        assert_eq!(
            StudyAggregator::ingest(&mut aggregator, &first, "/data").unwrap(),
            Ingested::NewSeries
        );

        let mut no_modality = record("1.2.3", "1.2.3.2", "b", "CR");
        no_modality.modality = None;
        assert!(matches!(
            StudyAggregator::ingest(&mut aggregator, &no_modality, "/data"),
            Err(ConvertError::MissingAttribute("Modality"))
        ));

        let second = record("1.2.3", "1.2.3.1", "c", "CR");
        assert_eq!(
            StudyAggregator::ingest(&mut aggregator, &second, "/data").unwrap(),
            Ingested::NewInstance
        );
        let study = aggregator.unwrap().into_study();
        assert_eq!(study.number_of_series, 1);
        assert_eq!(study.number_of_instances, 2);
    }

    #[test]
    fn test_ingest_without_study_leaves_none_on_error() {
        let mut aggregator = None;
        let mut rec = record("1.2.3", "1.2.3.1", "a", "CR");
        rec.sop_class_uid = None;

        assert!(StudyAggregator::ingest(&mut aggregator, &rec, "/data").is_err());
        assert!(aggregator.is_none());
    }

    #[test]
    fn test_modality_list_is_deduplicated() {
        let mut aggregator =
            StudyAggregator::new(&record("1.2.3", "s1", "a", "CT"), "/data").unwrap();
        aggregator.add(&record("1.2.3", "s2", "b", "PT")).unwrap();
        aggregator.add(&record("1.2.3", "s3", "c", "CT")).unwrap();
        aggregator.add(&record("1.2.3", "s4", "d", "PT")).unwrap();

        let codes: Vec<_> = aggregator
            .study()
            .modality
            .iter()
            .filter_map(|m| m.code.as_deref())
            .collect();
        assert_eq!(codes, vec!["CT", "PT"]);
    }

    #[test]
    fn test_laterality_overrides_body_part() {
        let mut rec = record("1.2.3", "1.2.3.1", "a", "MG");
        rec.body_part_examined = Some("BREAST".to_string());
        rec.laterality = Some("L".to_string());
        let aggregator = StudyAggregator::new(&rec, "/data").unwrap();

        let body_site = aggregator.study().series[0].body_site.as_ref().unwrap();
        assert_eq!(body_site.code.as_deref(), Some("L"));
    }

    #[test]
    fn test_structured_report_title() {
        let mut rec = record("1.2.3", "1.2.3.1", "a", "SR");
        rec.concept_name = Some("Radiology Report".to_string());
        let aggregator = StudyAggregator::new(&rec, "/data").unwrap();
        assert_eq!(
            aggregator.study().series[0].instance[0].title.as_deref(),
            Some("Radiology Report")
        );

        // 缺少来源字段时仍创建实例，只是没有标题
        let mut untitled = record("1.2.3", "1.2.3.2", "b", "SR");
        untitled.concept_name = None;
        let mut aggregator = aggregator;
        aggregator.add(&untitled).unwrap();
        let instance = &aggregator.study().series[1].instance[0];
        assert_eq!(instance.title, None);
        assert_eq!(aggregator.study().number_of_instances, 2);
    }

    #[test]
    fn test_series_order_is_preserved() {
        let mut aggregator =
            StudyAggregator::new(&record("1.2.3", "z", "1", "CR"), "/data").unwrap();
        aggregator.add(&record("1.2.3", "a", "2", "CR")).unwrap();
        aggregator.add(&record("1.2.3", "m", "3", "CR")).unwrap();
        aggregator.add(&record("1.2.3", "a", "4", "CR")).unwrap();

        let uids: Vec<_> = aggregator.study().series.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(uids, vec!["z", "a", "m"]);
        assert_eq!(aggregator.study().series[1].instance.len(), 2);
    }

    #[test]
    fn test_optional_study_fields_absent() {
        let rec = ParsedDicomObject {
            study_instance_uid: Some("1.2.3".to_string()),
            series_instance_uid: Some("1.2.3.1".to_string()),
            sop_instance_uid: Some("1.2.3.1.1".to_string()),
            sop_class_uid: Some("1.2.840.10008.5.1.4.1.1.1".to_string()),
            modality: Some("CR".to_string()),
            ..Default::default()
        };
        let study = StudyAggregator::new(&rec, "/data").unwrap().into_study();

        assert_eq!(study.description, None);
        assert_eq!(study.started, None);
        assert_eq!(study.procedure_code, None);
        assert_eq!(study.reason_code, None);
        assert_eq!(study.identifier.len(), 1);
        assert!(study.contained[0].identifier.is_empty());
        assert_eq!(study.series[0].body_site, None);
        assert_eq!(study.series[0].instance[0].title, None);
    }
}
