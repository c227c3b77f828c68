//! Document conversion via external tools.
//!
//! Outbound text is rendered to PDF, PDFs are flattened to Group 4 TIFF
//! for T.38 transmission, and inbound TIFFs come back to PDF. All runs go
//! through Ghostscript / tiff2pdf subprocesses inside a scratch directory
//! that is removed whatever the outcome, and every run is bounded by a
//! timeout.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::{ConvertConfig, ProcessorKind};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion failed: {0}")]
    Failed(String),

    #[error("conversion timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Conversion operations the fax pipeline needs.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Wrap plain text in a PDF
    async fn text_to_pdf(&self, text: &[u8]) -> Result<Vec<u8>>;

    /// Produce a fax-ready TIFF (Group 4, 204x196 DPI class)
    async fn pdf_to_tiff(&self, pdf: &[u8]) -> Result<Vec<u8>>;

    /// Convert a received TIFF to PDF
    async fn tiff_to_pdf(&self, tiff: &[u8]) -> Result<Vec<u8>>;

    /// Count pages in a PDF
    async fn count_pages(&self, pdf: &[u8]) -> Result<u32>;
}

/// Build the configured processor.
pub fn from_config(config: &ConvertConfig) -> std::sync::Arc<dyn DocumentProcessor> {
    match config.processor {
        ProcessorKind::Ghostscript => std::sync::Arc::new(GhostscriptProcessor::new(config)),
        ProcessorKind::Stub => std::sync::Arc::new(StubProcessor),
    }
}

/// Ghostscript-backed processor (plus tiff2pdf for the inbound direction)
pub struct GhostscriptProcessor {
    gs_bin: String,
    tiff2pdf_bin: String,
    timeout: Duration,
}

impl GhostscriptProcessor {
    pub fn new(config: &ConvertConfig) -> Self {
        Self {
            gs_bin: config.gs_bin.clone(),
            tiff2pdf_bin: config.tiff2pdf_bin.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, program: &str, args: &[&str], dir: &Path) -> Result<Vec<u8>> {
        let child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ConvertError::Timeout)??;

        if !output.status.success() {
            debug!(
                program,
                code = output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Converter exited nonzero"
            );
            return Err(ConvertError::Failed(format!("{program} exited nonzero")));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl DocumentProcessor for GhostscriptProcessor {
    async fn text_to_pdf(&self, text: &[u8]) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let ps_path = dir.path().join("in.ps");
        let pdf_path = dir.path().join("out.pdf");

        let text = String::from_utf8_lossy(text);
        tokio::fs::write(&ps_path, text_to_postscript(&text)).await?;

        self.run(
            &self.gs_bin,
            &[
                "-q",
                "-dNOPAUSE",
                "-dBATCH",
                "-dSAFER",
                "-sDEVICE=pdfwrite",
                "-sOutputFile=out.pdf",
                "in.ps",
            ],
            dir.path(),
        )
        .await?;

        Ok(tokio::fs::read(&pdf_path).await?)
    }

    async fn pdf_to_tiff(&self, pdf: &[u8]) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let pdf_path = dir.path().join("in.pdf");
        let tiff_path = dir.path().join("out.tiff");

        tokio::fs::write(&pdf_path, pdf).await?;

        self.run(
            &self.gs_bin,
            &[
                "-q",
                "-dNOPAUSE",
                "-dBATCH",
                "-dSAFER",
                "-sDEVICE=tiffg4",
                "-r204x196",
                "-sOutputFile=out.tiff",
                "in.pdf",
            ],
            dir.path(),
        )
        .await?;

        Ok(tokio::fs::read(&tiff_path).await?)
    }

    async fn tiff_to_pdf(&self, tiff: &[u8]) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let tiff_path = dir.path().join("in.tiff");
        let pdf_path = dir.path().join("out.pdf");

        tokio::fs::write(&tiff_path, tiff).await?;

        self.run(
            &self.tiff2pdf_bin,
            &["-o", "out.pdf", "in.tiff"],
            dir.path(),
        )
        .await?;

        Ok(tokio::fs::read(&pdf_path).await?)
    }

    async fn count_pages(&self, pdf: &[u8]) -> Result<u32> {
        let dir = tempfile::tempdir()?;
        let pdf_path = dir.path().join("in.pdf");
        tokio::fs::write(&pdf_path, pdf).await?;

        let stdout = self
            .run(
                &self.gs_bin,
                &[
                    "-q",
                    "-dNODISPLAY",
                    "-c",
                    "(in.pdf) (r) file runpdfbegin pdfpagecount = quit",
                ],
                dir.path(),
            )
            .await?;

        String::from_utf8_lossy(&stdout)
            .trim()
            .parse()
            .map_err(|_| ConvertError::Failed("unparseable page count".into()))
    }
}

/// Render text as single-column Courier PostScript, one page per 60 lines.
fn text_to_postscript(text: &str) -> String {
    let mut ps = String::from("%!PS-Adobe-3.0\n/Courier findfont 10 scalefont setfont\n");
    let mut line_on_page = 0;

    for raw_line in text.lines() {
        // Hard-wrap at 80 columns
        let mut rest = raw_line;
        loop {
            let (chunk, tail) = if rest.chars().count() > 80 {
                let split = rest.char_indices().nth(80).map(|(i, _)| i).unwrap();
                rest.split_at(split)
            } else {
                (rest, "")
            };

            if line_on_page == 0 {
                ps.push_str("72 720 moveto\n");
            }
            ps.push('(');
            for c in chunk.chars() {
                match c {
                    '(' | ')' | '\\' => {
                        ps.push('\\');
                        ps.push(c);
                    }
                    c => ps.push(c),
                }
            }
            ps.push_str(") show\n");

            line_on_page += 1;
            if line_on_page >= 60 {
                ps.push_str("showpage\n");
                line_on_page = 0;
            } else {
                ps.push_str(&format!("72 {} moveto\n", 720 - line_on_page * 12));
            }

            if tail.is_empty() {
                break;
            }
            rest = tail;
        }
    }

    ps.push_str("showpage\n");
    ps
}

/// No-op processor for tests and dev setups without Ghostscript: passes
/// bytes through with a minimal PDF wrapper and reports one page.
pub struct StubProcessor;

const STUB_PDF: &[u8] = b"%PDF-1.4\n1 0 obj<</Type/Catalog/Pages 2 0 R>>endobj\n2 0 obj<</Type/Pages/Kids[3 0 R]/Count 1>>endobj\n3 0 obj<</Type/Page/Parent 2 0 R/MediaBox[0 0 612 792]>>endobj\ntrailer<</Root 1 0 R>>\n%%EOF\n";

#[async_trait]
impl DocumentProcessor for StubProcessor {
    async fn text_to_pdf(&self, _text: &[u8]) -> Result<Vec<u8>> {
        Ok(STUB_PDF.to_vec())
    }

    async fn pdf_to_tiff(&self, pdf: &[u8]) -> Result<Vec<u8>> {
        Ok(pdf.to_vec())
    }

    async fn tiff_to_pdf(&self, _tiff: &[u8]) -> Result<Vec<u8>> {
        Ok(STUB_PDF.to_vec())
    }

    async fn count_pages(&self, _pdf: &[u8]) -> Result<u32> {
        Ok(1)
    }
}
