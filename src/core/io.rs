use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::Path;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = Path::new(prefix);
        let mut entries = Vec::new();

        if path.exists() {
            if path.is_dir() {
                let mut dir = tokio::fs::read_dir(path).await?;
                while let Some(entry) = dir.next_entry().await? {
                    entries.push(entry.path().to_string_lossy().to_string());
                }
            } else {
                entries.push(prefix.to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }
}

/// Source files the ingestion step understands.
pub fn is_supported_source(path: &str) -> bool {
    matches!(extension(path).as_deref(), Some("txt") | Some("epub"))
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Reads a novel segment as plain text. Blank content is returned as-is;
/// rejecting it is up to the pipeline.
pub async fn load_source_text(storage: &dyn Storage, path: &str) -> Result<String> {
    let bytes = storage.read(path).await?;
    match extension(path).as_deref() {
        Some("txt") => {
            let text = String::from_utf8(bytes)
                .with_context(|| format!("{} is not valid UTF-8", path))?;
            Ok(text.trim_start_matches('\u{feff}').to_string())
        }
        Some("epub") => epub_to_text(bytes).with_context(|| format!("Failed to read epub {}", path)),
        _ => bail!("Unsupported source file: {}", path),
    }
}

fn epub_to_text(bytes: Vec<u8>) -> Result<String> {
    let mut doc = epub::doc::EpubDoc::from_reader(Cursor::new(bytes))
        .map_err(|e| anyhow!("Failed to open epub: {:?}", e))?;

    let mut chapters = Vec::new();
    loop {
        let skip = matches!(
            doc.get_current_id().as_deref(),
            Some("title") | Some("colophon") | Some("contents")
        );
        if !skip {
            if let Some((content, mimetype)) = doc.get_current_str() {
                if mimetype == "application/xhtml+xml" || mimetype == "text/html" {
                    let text = html2text::from_read(content.as_bytes(), 500)
                        .map_err(|e| anyhow!("Failed to convert chapter: {:?}", e))?;
                    let text = text.trim();
                    if !text.is_empty() {
                        chapters.push(text.to_string());
                    }
                } else {
                    log::debug!("Skipping non-HTML spine item ({})", mimetype);
                }
            }
        }
        if !doc.go_next() {
            break;
        }
    }

    Ok(chapters.join("\n\n"))
}
