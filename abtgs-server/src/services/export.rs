//! Export
//!
//! Renders completed jobs into documents. The explicit export takes the
//! client's final speaker mapping as-is; nothing is re-derived from resolver
//! state. Batch download packs one automatically mapped document per completed
//! job into a ZIP archive. Completed uploads are also autosaved to the output
//! directory.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::assembler::TimecodeAssembler;
use super::filename_meta::strip_extension;
use crate::adapters::{DocumentGenerator, Participant, StageError, TranscriptDocument};
use crate::models::{derive_abbreviation, Job, JobState, ResolvedIdentity, SpeakerMapping, TranscriptResult};

pub const ZIP_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Job is not completed (status: {0})")]
    NotReady(JobState),

    #[error("No completed jobs to export")]
    NothingToExport,

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Cannot write document: {0}")]
    Io(#[from] std::io::Error),
}

/// Rendered document ready for download
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ExportService {
    generator: Arc<dyn DocumentGenerator>,
}

impl ExportService {
    pub fn new(generator: Arc<dyn DocumentGenerator>) -> Self {
        Self { generator }
    }

    /// Render a completed job with the client's final mapping
    ///
    /// `filename` overrides the download name; the generator's extension is
    /// appended when missing.
    pub fn export_job(
        &self,
        job: &Job,
        mapping: &SpeakerMapping,
        filename: Option<&str>,
        text_overrides: &BTreeMap<usize, String>,
    ) -> Result<ExportedDocument, ExportError> {
        let result = completed_result(job)?;
        let document = build_document(result, mapping, text_overrides);
        let bytes = self.generator.generate(&document)?;

        let filename = match filename.map(str::trim).filter(|f| !f.is_empty()) {
            Some(name) => self.with_extension(name),
            None => self.default_filename(result),
        };

        tracing::info!(job_id = %job.id, filename = %filename, lines = document.lines.len(), "Transcript exported");

        Ok(ExportedDocument {
            filename,
            content_type: self.generator.content_type(),
            bytes,
        })
    }

    /// Render with the current review mapping, or suggested names when the job
    /// was never reviewed
    pub fn auto_export(&self, job: &Job) -> Result<ExportedDocument, ExportError> {
        let result = completed_result(job)?;
        let (mapping, overrides) = match &job.review {
            Some(review) => (review.resolver.resolved_mapping(), review.text_overrides.clone()),
            None => (suggested_mapping(result), BTreeMap::new()),
        };
        self.export_job(job, &mapping, None, &overrides)
    }

    /// Write the auto-exported document into `output_dir`
    ///
    /// An existing file of the same name is kept; the new one gets the first
    /// eight characters of the job id appended to its stem.
    pub async fn autosave(&self, job: &Job, output_dir: &Path) -> Result<PathBuf, ExportError> {
        let document = self.auto_export(job)?;

        let mut path = output_dir.join(&document.filename);
        if tokio::fs::try_exists(&path).await? {
            let id = job.id.simple().to_string();
            let stem = strip_extension(&document.filename);
            path = output_dir.join(format!("{}_{}{}", stem, &id[..8], self.generator.extension()));
        }

        tokio::fs::write(&path, &document.bytes).await?;
        tracing::info!(job_id = %job.id, path = %path.display(), "Transcript autosaved");
        Ok(path)
    }

    /// ZIP of auto-exported documents for every completed job
    ///
    /// Jobs in other states are skipped. Colliding filenames get a ` (n)`
    /// suffix.
    pub fn batch_archive(&self, jobs: &[Job]) -> Result<ExportedDocument, ExportError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut used: HashSet<String> = HashSet::new();
        let mut written = 0usize;

        for job in jobs.iter().filter(|j| j.state == JobState::Completed) {
            let document = match self.auto_export(job) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Skipping job in batch archive");
                    continue;
                }
            };

            let name = unique_name(&document.filename, &mut used);
            zip.start_file(name, options)
                .map_err(|e| ExportError::Archive(e.to_string()))?;
            zip.write_all(&document.bytes)
                .map_err(|e| ExportError::Archive(e.to_string()))?;
            written += 1;
        }

        if written == 0 {
            return Err(ExportError::NothingToExport);
        }

        let bytes = zip
            .finish()
            .map_err(|e| ExportError::Archive(e.to_string()))?
            .into_inner();

        tracing::info!(documents = written, "Batch archive built");

        Ok(ExportedDocument {
            filename: "transcripts.zip".to_string(),
            content_type: ZIP_CONTENT_TYPE,
            bytes,
        })
    }

    fn default_filename(&self, result: &TranscriptResult) -> String {
        let stem = strip_extension(&result.meta.original_filename);
        let stem = if stem.trim().is_empty() { "transcript".to_string() } else { stem };
        format!("{}{}", stem, self.generator.extension())
    }

    fn with_extension(&self, name: &str) -> String {
        let ext = self.generator.extension();
        if name.to_lowercase().ends_with(ext) {
            name.to_string()
        } else {
            format!("{}{}", name, ext)
        }
    }
}

fn completed_result(job: &Job) -> Result<&TranscriptResult, ExportError> {
    match (&job.state, &job.result) {
        (JobState::Completed, Some(result)) => Ok(result),
        _ => Err(ExportError::NotReady(job.state)),
    }
}

/// Suggested names with derived abbreviations
pub fn suggested_mapping(result: &TranscriptResult) -> SpeakerMapping {
    let mut mapping = SpeakerMapping::default();
    for stats in &result.stats {
        mapping.insert(
            stats.tag.clone(),
            ResolvedIdentity {
                abbreviation: derive_abbreviation(&stats.suggested_name),
                name: stats.suggested_name.clone(),
            },
        );
    }
    mapping
}

/// Assemble header, participants and lines for a generator
pub fn build_document(
    result: &TranscriptResult,
    mapping: &SpeakerMapping,
    text_overrides: &BTreeMap<usize, String>,
) -> TranscriptDocument {
    let participants = result
        .stats
        .iter()
        .map(|stats| {
            let identity = mapping.get(&stats.tag);
            let name = identity
                .map(|i| i.name.clone())
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| stats.suggested_name.clone());
            Participant {
                name,
                abbreviation: identity.map(|i| i.abbreviation.clone()).unwrap_or_default(),
            }
        })
        .collect();

    let lines = TimecodeAssembler::new(result.meta.start_tc).assemble(
        result.transcript.segments(),
        mapping,
        text_overrides,
    );

    TranscriptDocument {
        source_filename: result.meta.original_filename.clone(),
        participants,
        lines,
    }
}

fn unique_name(filename: &str, used: &mut HashSet<String>) -> String {
    if used.insert(filename.to_string()) {
        return filename.to_string();
    }
    let (stem, ext) = match filename.rfind('.') {
        Some(idx) => filename.split_at(idx),
        None => (filename, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::docx::DocxGenerator;
    use crate::adapters::StageResult;
    use crate::models::{
        DiarizedSegment, DiarizedTranscript, EngineOptions, JobSource, TagStats, TranscriptMeta,
    };
    use abtgs_common::Timecode;

    /// Renders documents as plain text so tests can read them back
    struct TextGenerator;

    impl DocumentGenerator for TextGenerator {
        fn generate(&self, document: &TranscriptDocument) -> StageResult<Vec<u8>> {
            let mut out = format!("{}\n", document.source_filename);
            for p in &document.participants {
                out.push_str(&format!("{} ({})\n", p.name, p.abbreviation));
            }
            for line in &document.lines {
                out.push_str(&format!("{}\n", line));
            }
            Ok(out.into_bytes())
        }

        fn content_type(&self) -> &'static str {
            "text/plain"
        }

        fn extension(&self) -> &'static str {
            ".txt"
        }
    }

    fn completed_job(filename: &str) -> Job {
        let mut job = Job::new(
            JobSource::Link {
                url: "https://yadi.sk/d/x".to_string(),
            },
            EngineOptions::default(),
        );
        for state in [
            JobState::Downloading,
            JobState::Converting,
            JobState::Uploading,
            JobState::Transcribing,
        ] {
            job.transition_to(state).unwrap();
        }
        job.result = Some(TranscriptResult {
            transcript: DiarizedTranscript::new(vec![
                DiarizedSegment {
                    start_offset_ms: 0,
                    end_offset_ms: 1000,
                    tag: "1".to_string(),
                    text: "Вопрос".to_string(),
                },
                DiarizedSegment {
                    start_offset_ms: 1040,
                    end_offset_ms: 5000,
                    tag: "2".to_string(),
                    text: "Ответ".to_string(),
                },
            ]),
            stats: vec![
                TagStats {
                    tag: "2".to_string(),
                    duration_ms: 3960,
                    percentage: 80,
                    suggested_name: "Иванов".to_string(),
                    technical: false,
                },
                TagStats {
                    tag: "1".to_string(),
                    duration_ms: 1000,
                    percentage: 20,
                    suggested_name: "Спикер 1".to_string(),
                    technical: false,
                },
            ],
            meta: TranscriptMeta {
                original_filename: filename.to_string(),
                speakers: vec!["Иванов".to_string()],
                start_tc: Timecode::ZERO,
            },
        });
        job.transition_to(JobState::Completed).unwrap();
        job
    }

    fn text(doc: &ExportedDocument) -> String {
        String::from_utf8(doc.bytes.clone()).unwrap()
    }

    #[test]
    fn test_export_uses_mapping_verbatim() {
        let service = ExportService::new(Arc::new(TextGenerator));
        let mut mapping = SpeakerMapping::default();
        mapping.insert(
            "1",
            ResolvedIdentity {
                name: "Корреспондент".to_string(),
                abbreviation: "КОР".to_string(),
            },
        );
        mapping.insert(
            "2",
            ResolvedIdentity {
                name: "Петрова".to_string(),
                abbreviation: "ПЕТ".to_string(),
            },
        );

        let doc = service
            .export_job(&completed_job("clip.mp4"), &mapping, None, &BTreeMap::new())
            .unwrap();
        let body = text(&doc);
        assert_eq!(doc.filename, "clip.txt");
        assert!(body.contains("00:00:00:00 КОР: Вопрос"));
        assert!(body.contains("00:00:01:01 ПЕТ: Ответ"));
        assert!(body.contains("Петрова (ПЕТ)"));
    }

    #[test]
    fn test_export_filename_override_gets_extension() {
        let service = ExportService::new(Arc::new(TextGenerator));
        let job = completed_job("clip.mp4");
        let doc = service
            .export_job(&job, &SpeakerMapping::default(), Some("итог"), &BTreeMap::new())
            .unwrap();
        assert_eq!(doc.filename, "итог.txt");
        let doc = service
            .export_job(&job, &SpeakerMapping::default(), Some("final.TXT"), &BTreeMap::new())
            .unwrap();
        assert_eq!(doc.filename, "final.TXT");
    }

    #[test]
    fn test_export_rejects_unfinished_job() {
        let service = ExportService::new(Arc::new(TextGenerator));
        let job = Job::new(
            JobSource::Link {
                url: "https://yadi.sk/d/x".to_string(),
            },
            EngineOptions::default(),
        );
        let err = service
            .export_job(&job, &SpeakerMapping::default(), None, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ExportError::NotReady(JobState::Queued)));
    }

    #[test]
    fn test_auto_export_without_review_uses_suggestions() {
        let service = ExportService::new(Arc::new(TextGenerator));
        let body = text(&service.auto_export(&completed_job("a.mp4")).unwrap());
        assert!(body.contains("00:00:01:01 ИВА: Ответ"));
        assert!(body.contains("00:00:00:00 СПИ: Вопрос"));
    }

    #[tokio::test]
    async fn test_autosave_suffixes_colliding_names() {
        let service = ExportService::new(Arc::new(TextGenerator));
        let dir = tempfile::tempdir().unwrap();

        let first = completed_job("Иванов_интервью.mp4");
        let path = service.autosave(&first, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("Иванов_интервью.txt"));

        let second = completed_job("Иванов_интервью.mp4");
        let path = service.autosave(&second, dir.path()).await.unwrap();
        let expected = format!("Иванов_интервью_{}.txt", &second.id.simple().to_string()[..8]);
        assert_eq!(path, dir.path().join(expected));

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("ИВА: Ответ"));
    }

    #[test]
    fn test_batch_archive_skips_unfinished_and_dedupes_names() {
        let service = ExportService::new(Arc::new(DocxGenerator::new()));
        let queued = Job::new(
            JobSource::Link {
                url: "https://yadi.sk/d/q".to_string(),
            },
            EngineOptions::default(),
        );
        let jobs = vec![completed_job("same.mp4"), queued, completed_job("same.mp4")];

        let archive = service.batch_archive(&jobs).unwrap();
        assert_eq!(archive.content_type, ZIP_CONTENT_TYPE);

        let reader = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        let mut names: Vec<&str> = reader.file_names().collect();
        names.sort();
        assert_eq!(names, vec!["same (2).docx", "same.docx"]);
    }

    #[test]
    fn test_batch_archive_with_nothing_completed() {
        let service = ExportService::new(Arc::new(DocxGenerator::new()));
        let err = service.batch_archive(&[]).unwrap_err();
        assert!(matches!(err, ExportError::NothingToExport));
    }
}
