//! docseek ingest - Chunk, embed and index documents
//!
//! Accepts a single file or a directory. Directories are walked
//! recursively and every file with a recognised text extension is ingested
//! under its path relative to the root.

use std::path::{Path, PathBuf};

use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::app::AppContext;
use crate::cli::output::{emit_json, json_ok};
use crate::error::{DocseekError, Result};
use crate::types::{Document, DocumentKind};

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "html", "htm", "rs", "py", "js", "ts", "go", "java", "c",
    "cpp", "h", "rb", "swift", "kt", "toml", "yaml", "yml", "json",
];

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// File or directory to ingest
    pub path: PathBuf,

    /// Document id (single file only; defaults to the file name)
    #[arg(long)]
    pub id: Option<String>,

    /// Document title (single file only; defaults to the file stem)
    #[arg(long)]
    pub title: Option<String>,

    /// Document kind: text, markdown, code[:lang], pdf, web[:url]
    #[arg(long)]
    pub kind: Option<String>,

    /// Extra metadata as key=value (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,
}

#[derive(Debug, Serialize)]
struct IngestedDocument {
    document_id: String,
    chunks: usize,
}

pub fn run(ctx: &AppContext, args: &IngestArgs) -> Result<()> {
    let documents = collect_documents(args)?;
    let cancel = ctx.cancel_on_interrupt();

    let counts = ctx.block_on(ctx.engine.ingest_documents(documents, &cancel))?;
    let total: usize = counts.iter().map(|(_, chunks)| chunks).sum();

    if ctx.json_mode {
        let documents: Vec<IngestedDocument> = counts
            .iter()
            .map(|(id, chunks)| IngestedDocument {
                document_id: id.to_string(),
                chunks: *chunks,
            })
            .collect();
        emit_json(&json_ok(serde_json::json!({
            "documents": documents,
            "total_chunks": total,
        })))?;
    } else {
        for (id, chunks) in &counts {
            if *chunks == 0 {
                println!("{} {} (empty, skipped)", "!".yellow(), id.to_string().cyan());
            } else {
                println!("{} {} ({chunks} chunks)", "✓".green(), id.to_string().cyan());
            }
        }
        println!(
            "Ingested {} documents, {} chunks",
            counts.len().to_string().bold(),
            total.to_string().bold()
        );
    }

    Ok(())
}

fn collect_documents(args: &IngestArgs) -> Result<Vec<Document>> {
    let kind = match &args.kind {
        Some(raw) => Some(DocumentKind::parse(raw).ok_or_else(|| {
            DocseekError::MalformedInput(format!(
                "unknown document kind '{raw}' (expected text, markdown, code, pdf or web)"
            ))
        })?),
        None => None,
    };
    let metadata = parse_metadata(&args.metadata)?;

    if args.path.is_file() {
        let id = args.id.clone().unwrap_or_else(|| file_name(&args.path));
        let document = read_document(&args.path, id, args.title.clone(), kind.as_ref())?;
        return Ok(vec![with_metadata(document, &metadata)]);
    }

    if !args.path.is_dir() {
        return Err(DocseekError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", args.path.display()),
        )));
    }
    if args.id.is_some() || args.title.is_some() {
        return Err(DocseekError::MalformedInput(
            "--id and --title apply to a single file, not a directory".to_string(),
        ));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(&args.path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !has_text_extension(path) {
            debug!(path = %path.display(), "Skipping non-text file");
            continue;
        }
        let id = relative_id(&args.path, path);
        match read_document(path, id, None, kind.as_ref()) {
            Ok(document) => documents.push(with_metadata(document, &metadata)),
            Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable file"),
        }
    }
    Ok(documents)
}

fn read_document(
    path: &Path,
    id: String,
    title: Option<String>,
    kind: Option<&DocumentKind>,
) -> Result<Document> {
    let text = std::fs::read_to_string(path)?;
    let kind = kind.cloned().unwrap_or_else(|| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(DocumentKind::Text, DocumentKind::from_extension)
    });
    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Ok(Document::new(id, title, kind, text).with_extra("path", path.display().to_string()))
}

fn parse_metadata(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    DocseekError::MalformedInput(format!("metadata '{pair}' is not key=value"))
                })
        })
        .collect()
}

fn with_metadata(document: Document, metadata: &[(String, String)]) -> Document {
    metadata
        .iter()
        .fold(document, |doc, (key, value)| doc.with_extra(key, value))
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
