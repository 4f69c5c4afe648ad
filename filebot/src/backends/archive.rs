//! Archive detection, extraction and listing.

use super::{BackendError, BackendResult};
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// MIME types accepted as archives.
pub const SUPPORTED_ARCHIVE_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/x-rar-compressed",
    "application/x-7z-compressed",
];

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
    SevenZ,
}

impl ArchiveFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/zip" | "application/x-zip-compressed" => Some(Self::Zip),
            "application/x-rar-compressed" => Some(Self::Rar),
            "application/x-7z-compressed" => Some(Self::SevenZ),
            _ => None,
        }
    }

    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::Rar => ".rar",
            Self::SevenZ => ".7z",
        }
    }
}

/// Extract `archive` into `dest`. Entries that would land outside `dest`
/// are skipped.
///
/// `cancel` is checked between entries and kills `unrar`; once this returns
/// nothing more is written under `dest`.
pub async fn extract(
    format: ArchiveFormat,
    archive: &Path,
    dest: &Path,
    unrar_program: &str,
    cancel: &CancellationToken,
) -> BackendResult<()> {
    let (owned_archive, owned_dest, token) = (archive.to_path_buf(), dest.to_path_buf(), cancel.clone());
    let task = match format {
        ArchiveFormat::Zip => {
            tokio::task::spawn_blocking(move || extract_zip(&owned_archive, &owned_dest, &token))
        }
        ArchiveFormat::SevenZ => {
            tokio::task::spawn_blocking(move || extract_7z(&owned_archive, &owned_dest, &token))
        }
        ArchiveFormat::Rar => return extract_rar(archive, dest, unrar_program, cancel).await,
    };
    task.await
        .map_err(|e| BackendError::Archive(format!("extraction task failed: {e}")))?
}

fn extract_zip(archive: &Path, dest: &Path, cancel: &CancellationToken) -> BackendResult<()> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;

    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(name = %entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        std::io::copy(&mut entry, &mut file)?;
    }
    Ok(())
}

fn extract_7z(archive: &Path, dest: &Path, cancel: &CancellationToken) -> BackendResult<()> {
    let mut stopped = false;
    sevenz_rust::decompress_file_with_extract_fn(archive, dest, |entry, reader, path| {
        if cancel.is_cancelled() {
            stopped = true;
            // `false` stops the entry loop.
            return Ok(false);
        }
        sevenz_rust::default_entry_extract_fn(entry, reader, path)
    })
    .map_err(|e| BackendError::Archive(e.to_string()))?;

    if stopped {
        return Err(BackendError::Cancelled);
    }
    Ok(())
}

async fn extract_rar(
    archive: &Path,
    dest: &Path,
    program: &str,
    cancel: &CancellationToken,
) -> BackendResult<()> {
    // unrar treats a trailing separator as "extract into this directory".
    let mut target = dest.as_os_str().to_os_string();
    target.push(std::path::MAIN_SEPARATOR_STR);

    let mut child = Command::new(program)
        .arg("x")
        .arg("-o+")
        .arg("-y")
        .arg(archive)
        .arg(target)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BackendError::Tool(format!("failed to run {program}: {e}")))?;

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            // Reap the process so it cannot write after we return.
            let _ = child.kill().await;
            return Err(BackendError::Cancelled);
        }
        status = child.wait() => status?,
    };

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        return Err(BackendError::Archive(format!(
            "{program} exited with {status}: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

/// Regular files under `root`, relative to it, in a stable order.
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect()
}

/// Caption showing where a file sits inside the archive.
///
/// ```text
/// 📂 File Location:
/// 📁 docs
///   📄 readme.txt
/// ```
pub fn location_caption(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let last = parts.len().saturating_sub(1);
    let lines: Vec<String> = parts
        .iter()
        .enumerate()
        .map(|(depth, part)| {
            let icon = if depth == last { "📄" } else { "📁" };
            format!("{}{icon} {part}", "  ".repeat(depth))
        })
        .collect();

    format!("📂 File Location:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("docs/", options).unwrap();
        writer.start_file("docs/readme.txt", options).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.start_file("b.txt", options).unwrap();
        writer.write_all(b"b").unwrap();
        writer.start_file("a.txt", options).unwrap();
        writer.write_all(b"a").unwrap();
        if writer.start_file("../evil.txt", options).is_ok() {
            writer.write_all(b"evil").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_format_from_mime() {
        assert_eq!(ArchiveFormat::from_mime("application/zip"), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::from_mime("application/x-zip-compressed"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_mime("application/x-7z-compressed"),
            Some(ArchiveFormat::SevenZ)
        );
        assert_eq!(ArchiveFormat::from_mime("application/pdf"), None);
        for mime in SUPPORTED_ARCHIVE_TYPES {
            assert!(ArchiveFormat::from_mime(mime).is_some());
        }
    }

    #[tokio::test]
    async fn test_extract_zip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.zip");
        write_zip(&archive);
        let dest = dir.path().join("out").join("extracted");
        std::fs::create_dir_all(&dest).unwrap();

        extract(ArchiveFormat::Zip, &archive, &dest, "unrar", &CancellationToken::new())
            .await
            .unwrap();

        let files = list_files(&dest);
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b.txt"),
                PathBuf::from("docs").join("readme.txt"),
            ]
        );
        assert_eq!(std::fs::read(dest.join("docs/readme.txt")).unwrap(), b"hello");
        assert!(!dir.path().join("out").join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_extract_corrupt_zip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();
        let result = extract(
            ArchiveFormat::Zip,
            &archive,
            dir.path(),
            "unrar",
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(BackendError::Archive(_))));
    }

    #[tokio::test]
    async fn test_cancelled_extraction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.zip");
        write_zip(&archive);
        let dest = dir.path().join("extracted");
        std::fs::create_dir_all(&dest).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = extract(ArchiveFormat::Zip, &archive, &dest, "unrar", &cancel).await;

        assert!(matches!(result, Err(BackendError::Cancelled)));
        assert!(list_files(&dest).is_empty());
    }

    #[test]
    fn test_location_caption() {
        let caption = location_caption(&PathBuf::from("docs").join("api").join("index.html"));
        assert_eq!(
            caption,
            "📂 File Location:\n📁 docs\n  📁 api\n    📄 index.html"
        );
        assert_eq!(
            location_caption(Path::new("top.txt")),
            "📂 File Location:\n📄 top.txt"
        );
    }
}
