//! # Document loader
//!
//! Reads every `.txt` file of a corpus directory into a [`Document`], extracts a small
//! amount of metadata and splits documents into paragraph-aligned [`Chunk`]s.
//!
//! ## Chunking policy
//! Paragraphs (separated by a blank line) are packed greedily into a buffer. When the next
//! paragraph would push the buffer past `chunk_size` characters, the buffer is emitted and
//! the paragraph starts a new one. Paragraphs are never split, so a single paragraph longer
//! than `chunk_size` becomes an oversized chunk of its own.
//!
//! ```rust
//! use sanskrit_rag::loader::{Document, chunk_document};
//!
//! let doc = Document::new("a.txt", "Title A\n\nPara one.\n\nPara two.");
//! let chunks = chunk_document(&doc, 500);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata.title, "Title A");
//! assert_eq!(chunks[0].metadata.chunk_id, 0);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Blank-line paragraph boundary; tolerates trailing spaces and CRLF line endings.
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph regex is valid"));

const SEPARATOR: &str = "\n\n";

/// Metadata extracted once per document and copied into each of its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    /// File name the document was read from.
    pub source: String,
    /// Length of the raw content, in characters.
    pub length: usize,
    /// Lines of the trimmed content; 0 for an empty or whitespace-only document.
    pub num_lines: usize,
}

/// A whole file of the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub filename: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        let content = content.into();
        let metadata = extract_metadata(&filename, &content);
        Self {
            filename,
            content,
            metadata,
        }
    }
}

/// Metadata of a chunk: the parent document's metadata plus the chunk's position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub source: String,
    pub length: usize,
    pub num_lines: usize,
    /// 0-based sequence number within the parent document.
    pub chunk_id: usize,
}

impl ChunkMetadata {
    fn new(document: &DocumentMetadata, chunk_id: usize) -> Self {
        Self {
            title: document.title.clone(),
            source: document.source.clone(),
            length: document.length,
            num_lines: document.num_lines,
            chunk_id,
        }
    }
}

/// The unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Title, source, length and line count of a document.
///
/// The title is the first non-empty line with whitespace runs collapsed; an empty document
/// is titled after its file name.
pub fn extract_metadata(filename: &str, content: &str) -> DocumentMetadata {
    let trimmed = content.trim();
    let title = trimmed
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|line| !line.is_empty())
        .unwrap_or_else(|| filename.to_string());

    DocumentMetadata {
        title,
        source: filename.to_string(),
        length: content.chars().count(),
        num_lines: trimmed.lines().count(),
    }
}

/// Loads the `.txt` files of one directory (non-recursive).
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    data_dir: PathBuf,
}

impl DocumentLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Read every text file in the data directory, ordered by file name.
    ///
    /// A missing directory yields no documents. A file that cannot be read is reported
    /// and skipped; the remaining files still load.
    pub fn load_documents(&self) -> Vec<Document> {
        info!("Loading documents from {}", self.data_dir.display());

        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Data directory {} is not readable: {}",
                    self.data_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            match fs::read_to_string(&path) {
                Ok(content) => {
                    debug!("Loaded: {}", filename);
                    documents.push(Document::new(filename, content));
                }
                Err(e) => warn!("Error loading {}: {}", filename, e),
            }
        }

        info!("Loaded {} documents", documents.len());
        documents
    }
}

/// Trimmed, non-empty paragraphs of `content`, in order.
fn paragraphs(content: &str) -> impl Iterator<Item = &str> {
    PARAGRAPH_BREAK
        .split(content)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Split one document into chunks of at most `chunk_size` characters.
pub fn chunk_document(doc: &Document, chunk_size: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    // Counts a separator after every buffered paragraph, so the flushed (joined) text is
    // always two characters shorter than this.
    let mut buffer_len = 0usize;

    for para in paragraphs(&doc.content) {
        let para_len = para.chars().count();
        if buffer_len + para_len > chunk_size && !buffer.is_empty() {
            emit(doc, &buffer, &mut chunks);
            buffer.clear();
            buffer_len = 0;
        }
        buffer.push(para);
        buffer_len += para_len + SEPARATOR.len();
    }

    if !buffer.is_empty() {
        emit(doc, &buffer, &mut chunks);
    }

    chunks
}

fn emit(doc: &Document, paragraphs: &[&str], chunks: &mut Vec<Chunk>) {
    let chunk_id = chunks.len();
    chunks.push(Chunk {
        content: paragraphs.join(SEPARATOR),
        metadata: ChunkMetadata::new(&doc.metadata, chunk_id),
    });
}

/// Chunk every document, preserving document order.
pub fn chunk_documents(docs: &[Document], chunk_size: usize) -> Vec<Chunk> {
    info!("Chunking documents (size: {} chars)", chunk_size);
    let chunks: Vec<Chunk> = docs
        .iter()
        .flat_map(|doc| chunk_document(doc, chunk_size))
        .collect();
    info!("Created {} chunks", chunks.len());
    chunks
}
