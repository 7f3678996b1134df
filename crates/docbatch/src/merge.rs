//! Merge: combines a finished job's extracted texts into one
//! downloadable artifact.
//!
//! Merging is on demand and idempotent: while a non-expired output for
//! the same (job, format) pair exists it is returned as-is. The
//! artifact concatenates completed files in upload order; failed and
//! skipped files are listed in an omission note instead of silently
//! disappearing.

use std::io::Write;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::db::file_repo::{self, FileRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::output_repo::{self, OutputRow};
use crate::db::Database;
use crate::error::{DocbatchError, MergeError, Result};
use crate::storage::BlobStore;
use crate::token;
use crate::types::FileStatus;

/// Output format of a merged artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFormat {
    PlainText,
    Markdown,
    WordDocument,
}

impl MergeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeFormat::PlainText => "plain_text",
            MergeFormat::Markdown => "markdown",
            MergeFormat::WordDocument => "word_document",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, MergeError> {
        match s {
            "plain_text" => Ok(MergeFormat::PlainText),
            "markdown" => Ok(MergeFormat::Markdown),
            "word_document" => Ok(MergeFormat::WordDocument),
            other => Err(MergeError::UnknownFormat(other.to_string())),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MergeFormat::PlainText => "text/plain; charset=utf-8",
            MergeFormat::Markdown => "text/markdown; charset=utf-8",
            MergeFormat::WordDocument => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            MergeFormat::PlainText => "txt",
            MergeFormat::Markdown => "md",
            MergeFormat::WordDocument => "docx",
        }
    }
}

impl std::fmt::Display for MergeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds merged artifacts and registers their download tokens.
#[derive(Clone)]
pub struct Merger {
    db: Database,
    blob: Arc<dyn BlobStore>,
    token_ttl: Duration,
}

impl Merger {
    pub fn new(db: Database, blob: Arc<dyn BlobStore>, token_ttl: Duration) -> Self {
        Self {
            db,
            blob,
            token_ttl,
        }
    }

    /// Merges a job's completed texts into `format`.
    ///
    /// Requires every file of the job to be terminal; at least one file
    /// must have completed. Returns the existing output when a
    /// non-expired one for this (job, format) pair is already
    /// registered.
    pub fn merge_job(&self, job_id: &str, format: MergeFormat) -> Result<OutputRow> {
        let now = Utc::now();
        let job_id = job_id.to_string();

        let (job, files, existing) = self.db.with_conn(|conn| {
            let job = job_repo::find_by_id(conn, &job_id)?;
            let files = file_repo::list_for_job(conn, &job_id)?;
            let existing =
                output_repo::find_active(conn, &job_id, format.as_str(), &now.to_rfc3339())?;
            Ok((job, files, existing))
        })?;
        let job = job.ok_or_else(|| DocbatchError::JobNotFound(job_id.clone()))?;

        if let Some(output) = existing {
            log::debug!(
                "Reusing active {} output {} for job {}",
                format,
                output.id,
                job_id
            );
            return Ok(output);
        }

        let in_flight = files
            .iter()
            .filter(|f| !matches!(FileStatus::parse(&f.status), Some(s) if s.is_terminal()))
            .count() as u64;
        if in_flight > 0 {
            return Err(MergeError::NotReady {
                job_id,
                pending: in_flight,
            }
            .into());
        }

        let mut sections = Vec::new();
        let mut omitted = Vec::new();
        for file in &files {
            match (&file.status, &file.text_ref) {
                (s, Some(text_ref)) if s == FileStatus::Completed.as_str() => {
                    let bytes = self.blob.get(text_ref)?;
                    sections.push((file, String::from_utf8_lossy(&bytes).into_owned()));
                }
                _ => omitted.push(file),
            }
        }
        if sections.is_empty() {
            return Err(MergeError::NothingToMerge(job_id).into());
        }

        let bytes = match format {
            MergeFormat::PlainText => build_plain_text(&job, &sections, &omitted).into_bytes(),
            MergeFormat::Markdown => build_markdown(&job, &sections, &omitted).into_bytes(),
            MergeFormat::WordDocument => build_word_document(&job, &sections, &omitted)?,
        };

        let storage_ref = self.blob.put(&bytes)?;
        let output = OutputRow {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            format: format.as_str().to_string(),
            storage_ref,
            byte_size: bytes.len() as u64,
            download_token: token::generate_token()?,
            expires_at: (now + self.token_ttl).to_rfc3339(),
            download_count: 0,
            created_at: now.to_rfc3339(),
        };

        // Re-check inside the insert transaction: a concurrent merge for
        // the same (job, format) may have registered an output while the
        // artifact was being built.
        let winner = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            if let Some(existing) =
                output_repo::find_active(&tx, &job_id, format.as_str(), &now.to_rfc3339())?
            {
                tx.commit()?;
                return Ok(Some(existing));
            }
            output_repo::insert(&tx, &output)?;
            tx.commit()?;
            Ok(None)
        })?;
        if let Some(existing) = winner {
            self.blob.delete(&output.storage_ref)?;
            log::debug!(
                "Concurrent merge already registered {} output {} for job {}; discarding duplicate artifact",
                format,
                existing.id,
                job_id
            );
            return Ok(existing);
        }

        log::info!(
            "Merged job {} into {} ({} file(s), {} omitted, {} bytes)",
            job.id,
            format,
            sections.len(),
            omitted.len(),
            output.byte_size
        );
        Ok(output)
    }
}

fn omission_line(file: &FileRow) -> String {
    match file.error_code.as_deref() {
        Some(code) => format!("{} ({}: {})", file.filename, file.status, code),
        None => format!("{} ({})", file.filename, file.status),
    }
}

fn build_plain_text(job: &JobRow, sections: &[(&FileRow, String)], omitted: &[&FileRow]) -> String {
    let mut out = format!("{}\n{}\n\n", job.name, "=".repeat(job.name.len()));
    for (file, text) in sections {
        out.push_str(&format!("--- {} ---\n\n", file.filename));
        out.push_str(text.trim_end());
        out.push_str("\n\n");
    }
    if !omitted.is_empty() {
        out.push_str("Files not included:\n");
        for file in omitted {
            out.push_str(&format!("  - {}\n", omission_line(file)));
        }
    }
    out
}

fn build_markdown(job: &JobRow, sections: &[(&FileRow, String)], omitted: &[&FileRow]) -> String {
    let mut out = format!("# {}\n\n", job.name);
    for (file, text) in sections {
        out.push_str(&format!("## {}\n\n", file.filename));
        out.push_str(text.trim_end());
        out.push_str("\n\n");
    }
    if !omitted.is_empty() {
        out.push_str("## Files not included\n\n");
        for file in omitted {
            out.push_str(&format!("- {}\n", omission_line(file)));
        }
    }
    out
}

/// Minimal WordprocessingML package: one document part, one paragraph
/// per text line, headings styled by size only.
fn build_word_document(
    job: &JobRow,
    sections: &[(&FileRow, String)],
    omitted: &[&FileRow],
) -> std::result::Result<Vec<u8>, MergeError> {
    let mut body = String::new();
    body.push_str(&heading_xml(&job.name, 32));
    for (file, text) in sections {
        body.push_str(&heading_xml(&file.filename, 26));
        for line in text.lines() {
            body.push_str(&paragraph_xml(line));
        }
    }
    if !omitted.is_empty() {
        body.push_str(&heading_xml("Files not included", 26));
        for file in omitted {
            body.push_str(&paragraph_xml(&omission_line(file)));
        }
    }

    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{}</w:body></w:document>",
        body
    );

    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let parts: [(&str, &str); 3] = [
        (
            "[Content_Types].xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
             </Types>",
        ),
        (
            "_rels/.rels",
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             <Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/>\
             </Relationships>",
        ),
        ("word/document.xml", &document),
    ];
    for (name, content) in parts {
        writer
            .start_file(name, options)
            .map_err(|e| MergeError::DocumentBuild(e.to_string()))?;
        writer
            .write_all(content.as_bytes())
            .map_err(|e| MergeError::DocumentBuild(e.to_string()))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| MergeError::DocumentBuild(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn heading_xml(text: &str, half_points: u32) -> String {
    format!(
        "<w:p><w:pPr><w:rPr><w:b/><w:sz w:val=\"{}\"/></w:rPr></w:pPr>\
         <w:r><w:rPr><w:b/><w:sz w:val=\"{}\"/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        half_points,
        half_points,
        escape_xml(text)
    )
}

fn paragraph_xml(text: &str) -> String {
    format!(
        "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
