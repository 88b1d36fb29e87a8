use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{error, warn};
use rand::RngCore;
use rocket::fs::TempFile;
use rocket::tokio::io::AsyncReadExt;
use serde::Serialize;

pub const MB: u64 = 1024 * 1024;

/// Per-request cap across every file in one upload.
pub const MAX_TOTAL_SIZE: u64 = 150 * MB;

/// Longest stem kept from the client's filename.
const NAME_STEM_MAX: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadCategory {
    Images,
    Videos,
    Pdfs,
    Documents,
}

impl UploadCategory {
    pub const ALL: [UploadCategory; 4] = [
        UploadCategory::Images,
        UploadCategory::Videos,
        UploadCategory::Pdfs,
        UploadCategory::Documents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Images => "images",
            UploadCategory::Videos => "videos",
            UploadCategory::Pdfs => "pdfs",
            UploadCategory::Documents => "documents",
        }
    }

    pub fn max_size(&self) -> u64 {
        match self {
            UploadCategory::Images => 10 * MB,
            UploadCategory::Videos => 100 * MB,
            UploadCategory::Pdfs => 20 * MB,
            UploadCategory::Documents => 10 * MB,
        }
    }
}

/// An accepted MIME type. `magic` is the required file prefix, if the
/// format has a fixed one.
#[derive(Debug)]
pub struct AllowedType {
    pub mime: &'static str,
    pub category: UploadCategory,
    pub ext: &'static str,
    pub magic: Option<&'static [u8]>,
}

pub const ALLOWED_TYPES: &[AllowedType] = &[
    AllowedType { mime: "image/jpeg", category: UploadCategory::Images, ext: ".jpg", magic: Some(&[0xFF, 0xD8, 0xFF]) },
    AllowedType { mime: "image/png", category: UploadCategory::Images, ext: ".png", magic: Some(&[0x89, 0x50, 0x4E, 0x47]) },
    AllowedType { mime: "image/gif", category: UploadCategory::Images, ext: ".gif", magic: Some(&[0x47, 0x49, 0x46]) },
    AllowedType { mime: "image/webp", category: UploadCategory::Images, ext: ".webp", magic: Some(&[0x52, 0x49, 0x46, 0x46]) },
    // MP4 headers vary by brand.
    AllowedType { mime: "video/mp4", category: UploadCategory::Videos, ext: ".mp4", magic: None },
    AllowedType { mime: "video/webm", category: UploadCategory::Videos, ext: ".webm", magic: Some(&[0x1A, 0x45, 0xDF, 0xA3]) },
    AllowedType { mime: "video/ogg", category: UploadCategory::Videos, ext: ".ogg", magic: Some(&[0x4F, 0x67, 0x67, 0x53]) },
    AllowedType { mime: "application/pdf", category: UploadCategory::Pdfs, ext: ".pdf", magic: Some(&[0x25, 0x50, 0x44, 0x46]) },
    AllowedType { mime: "application/msword", category: UploadCategory::Documents, ext: ".doc", magic: Some(&[0xD0, 0xCF, 0x11, 0xE0]) },
    AllowedType {
        mime: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        category: UploadCategory::Documents,
        ext: ".docx",
        magic: Some(&[0x50, 0x4B, 0x03, 0x04]),
    },
    AllowedType { mime: "text/plain", category: UploadCategory::Documents, ext: ".txt", magic: None },
];

pub fn lookup(mime: &str) -> Option<&'static AllowedType> {
    let mime = mime.trim().to_ascii_lowercase();
    ALLOWED_TYPES.iter().find(|t| t.mime == mime)
}

pub fn magic_matches(head: &[u8], magic: Option<&[u8]>) -> bool {
    match magic {
        None => true,
        Some(m) => head.len() >= m.len() && head[..m.len()] == *m,
    }
}

/// Type, size, and content checks for one file.
pub fn validate(mime: &str, size: u64, head: &[u8]) -> Result<&'static AllowedType, String> {
    let allowed = lookup(mime).ok_or_else(|| {
        format!(
            "File type \"{}\" is not allowed. Allowed types: Images, Videos, PDFs, Documents (DOC/DOCX/TXT)",
            mime
        )
    })?;
    let max = allowed.category.max_size();
    if size > max {
        return Err(format!(
            "File exceeds maximum size of {}MB for {}",
            max / MB,
            allowed.category.as_str()
        ));
    }
    if !magic_matches(head, allowed.magic) {
        return Err(format!(
            "File content does not match declared type \"{}\". File may be corrupted or mislabeled.",
            mime
        ));
    }
    Ok(allowed)
}

// ── Filenames ───────────────────────────────────────────

/// Strip separators, NULs and `..`; map anything outside `[A-Za-z0-9_.-]`
/// to `_`; cap at 100 chars. Never empty.
pub fn sanitize_filename(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();
    let stripped = stripped.replace("..", "");
    let mut clean: String = stripped
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    if clean.is_empty() {
        clean.push_str("file");
    }
    clean
}

/// `<ms>-<16 hex>-<stem≤20><ext>`
pub fn unique_filename(original: &str, ext: &str) -> String {
    let stem = match original.rfind('.') {
        Some(i) if i > 0 => &original[..i],
        _ => original,
    };
    let stem: String = sanitize_filename(stem).chars().take(NAME_STEM_MAX).collect();
    let mut rand_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut rand_bytes);
    format!(
        "{}-{}-{}{}",
        Utc::now().timestamp_millis(),
        hex::encode(rand_bytes),
        stem,
        ext
    )
}

// ── Directories ─────────────────────────────────────────

pub fn ensure_dirs(uploads_dir: &Path) -> io::Result<()> {
    for category in UploadCategory::ALL {
        fs::create_dir_all(uploads_dir.join(category.as_str()))?;
    }
    Ok(())
}

// ── Saving ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedUpload {
    pub path: String,
    pub category: UploadCategory,
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
}

pub fn mime_of(file: &TempFile<'_>) -> String {
    file.content_type()
        .map(|ct| format!("{}/{}", ct.top(), ct.sub()).to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn original_name(file: &TempFile<'_>) -> String {
    file.raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .or_else(|| file.name().map(str::to_string))
        .unwrap_or_else(|| "file".to_string())
}

async fn read_head(file: &TempFile<'_>, len: usize) -> io::Result<Vec<u8>> {
    let reader = file.open().await?;
    rocket::tokio::pin!(reader);
    let mut head = Vec::with_capacity(len);
    reader.as_mut().take(len as u64).read_to_end(&mut head).await?;
    Ok(head)
}

/// Validate one multipart file and move it into
/// `<uploads_dir>/<category>/` through a `.tmp` sibling.
pub async fn save(uploads_dir: &Path, file: &mut TempFile<'_>) -> Result<SavedUpload, String> {
    let mime = mime_of(file);
    let original = original_name(file);
    let size = file.len();

    let head = read_head(file, 8).await.map_err(|e| {
        error!("Failed to read upload {}: {}", original, e);
        "Failed to save file. Please try again.".to_string()
    })?;
    let allowed = validate(&mime, size, &head)?;

    let dir = uploads_dir.join(allowed.category.as_str());
    let filename = unique_filename(&original, allowed.ext);
    let dest = dir.join(&filename);
    let tmp = dir.join(format!("{}.tmp", filename));

    let moved = async {
        rocket::tokio::fs::create_dir_all(&dir).await?;
        file.move_copy_to(&tmp).await?;
        rocket::tokio::fs::rename(&tmp, &dest).await
    }
    .await;
    if let Err(e) = moved {
        error!("File save error: {}", e);
        let _ = fs::remove_file(&tmp);
        return Err("Failed to save file. Please try again.".to_string());
    }

    Ok(SavedUpload {
        path: format!("/uploads/{}/{}", allowed.category.as_str(), filename),
        category: allowed.category,
        filename,
        original_name: sanitize_filename(&original),
        size,
        mime,
    })
}

// ── Deleting ────────────────────────────────────────────

fn resolve_public(public_dir: &Path, public_path: &str) -> Option<PathBuf> {
    let rel = public_path.strip_prefix("/uploads/")?;
    if rel.is_empty() || rel.contains("..") || rel.contains('\\') || rel.contains('\0') {
        return None;
    }
    Some(public_dir.join("uploads").join(rel))
}

/// Remove a file by its public path (`/uploads/...`). Returns `Ok(false)`
/// when nothing was deleted; refuses anything resolving outside the
/// uploads root.
pub fn delete_upload(public_dir: &Path, public_path: &str) -> io::Result<bool> {
    let target = match resolve_public(public_dir, public_path) {
        Some(p) => p,
        None => {
            warn!("Refusing to delete {}: not an upload path", public_path);
            return Ok(false);
        }
    };
    if !target.is_file() {
        return Ok(false);
    }
    let root = public_dir.join("uploads").canonicalize()?;
    let resolved = target.canonicalize()?;
    if !resolved.starts_with(&root) {
        error!("Attempted to delete file outside uploads directory: {}", public_path);
        return Ok(false);
    }
    fs::remove_file(&resolved)?;
    Ok(true)
}

// ── Listing ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

pub fn media_kind(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" => "image",
        "mp4" | "webm" | "mov" => "video",
        "pdf" => "pdf",
        _ => "document",
    }
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<MediaFile>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.ends_with(".tmp") {
            continue;
        }
        let meta = entry.metadata()?;
        let public = format!("{}/{}", prefix, name);
        if meta.is_dir() {
            walk(&entry.path(), &public, out)?;
        } else if meta.is_file() {
            let mtime = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(MediaFile {
                kind: media_kind(&name),
                path: public,
                name,
                size: meta.len(),
                mtime,
            });
        }
    }
    Ok(())
}

/// Every file under the uploads root, newest first.
pub fn list_media(public_dir: &Path) -> io::Result<Vec<MediaFile>> {
    let root = public_dir.join("uploads");
    let mut files = Vec::new();
    if root.is_dir() {
        walk(&root, "/uploads", &mut files)?;
    }
    files.sort_by(|a, b| b.mtime.cmp(&a.mtime));
    Ok(files)
}
