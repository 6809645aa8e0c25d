use std::fs;
use std::io::{self, Read};
use std::path::Path;

use crate::models::FileDescriptor;

pub fn describe(path: &Path) -> io::Result<FileDescriptor> {
    let meta = fs::metadata(path)?;
    let modified_time = meta
        .modified()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .unwrap_or_default();
    Ok(FileDescriptor {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: path.to_path_buf(),
        file_size: meta.len(),
        file_extension: extension_of(path)
            .map(|e| format!(".{}", e))
            .unwrap_or_default(),
        mime_type: guess_mime(path),
        modified_time,
    })
}

/// Lower-cased extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Extension-based guess, then magic-byte sniffing.
pub fn guess_mime(path: &Path) -> Option<String> {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return Some(mime.essence_str().to_string());
    }
    infer::get_from_path(path)
        .ok()
        .flatten()
        .map(|kind| kind.mime_type().to_string())
}

pub fn read_head(path: &Path, max_bytes: usize) -> io::Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut buf = Vec::with_capacity(max_bytes);
    file.take(max_bytes as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn hex_preview(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// EXIF orientation (1-8), or 1 when absent or unreadable.
pub fn read_exif_orientation(data: &[u8]) -> u8 {
    let mut cursor = io::Cursor::new(data);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(e) => e,
        Err(_) => return 1,
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
        .map(|v| v as u8)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_file_with_dot_extension_and_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Notes.TXT");
        fs::write(&path, b"hello").unwrap();

        let info = describe(&path).unwrap();
        assert_eq!(info.filename, "Notes.TXT");
        assert_eq!(info.file_size, 5);
        assert_eq!(info.file_extension, ".txt");
        assert_eq!(info.mime_type.as_deref(), Some("text/plain"));
        assert!(describe(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn unknown_extension_falls_back_to_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.zzq");
        fs::write(&path, b"\x89PNG\r\n\x1a\n0000").unwrap();
        assert_eq!(guess_mime(&path).as_deref(), Some("image/png"));
    }

    #[test]
    fn preview_and_orientation_defaults() {
        assert_eq!(hex_preview(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(read_exif_orientation(b"not an image"), 1);
    }
}
