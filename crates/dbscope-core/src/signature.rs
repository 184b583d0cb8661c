//! File-format sniffing for binary cell values.
//!
//! [`classify`] looks only at leading bytes: first a table of magic prefixes,
//! then two container checks whose type tag sits at a fixed offset (RIFF
//! chunks and ISO base media `ftyp` boxes).

use serde::{Deserialize, Serialize};

/// A file format recognised by its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    // Images
    Jpeg,
    Png,
    Gif,
    Bmp,
    Webp,
    // Archives
    Zip,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Tar,
    SevenZip,
    Rar,
    Zlib,
    // Audio
    Mp3,
    Flac,
    Ogg,
    Wav,
    M4a,
    // Video
    Mp4,
    M4v,
    Mov,
    ThreeGp,
    Mpeg,
    Mkv,
    Avi,
    // Documents
    Pdf,
    Xml,
    Html,
    Text,
    PostScript,
    Ole,
    // Fonts
    Ttf,
    Otf,
    // Executables
    Elf,
    Exe,
    Swf,
    // Databases and disk images
    Sqlite,
    Qcow,
}

impl FileKind {
    /// Extension used when writing this kind to disk, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Jpeg => "jpg",
            FileKind::Png => "png",
            FileKind::Gif => "gif",
            FileKind::Bmp => "bmp",
            FileKind::Webp => "webp",
            FileKind::Zip => "zip",
            FileKind::Gzip => "gz",
            FileKind::Bzip2 => "bz2",
            FileKind::Xz => "xz",
            FileKind::Zstd => "zst",
            FileKind::Tar => "tar",
            FileKind::SevenZip => "7z",
            FileKind::Rar => "rar",
            FileKind::Zlib => "zlib",
            FileKind::Mp3 => "mp3",
            FileKind::Flac => "flac",
            FileKind::Ogg => "ogg",
            FileKind::Wav => "wav",
            FileKind::M4a => "m4a",
            FileKind::Mp4 => "mp4",
            FileKind::M4v => "m4v",
            FileKind::Mov => "mov",
            FileKind::ThreeGp => "3gp",
            FileKind::Mpeg => "mpeg",
            FileKind::Mkv => "mkv",
            FileKind::Avi => "avi",
            FileKind::Pdf => "pdf",
            FileKind::Xml => "xml",
            FileKind::Html => "html",
            FileKind::Text => "txt",
            FileKind::PostScript => "ps",
            FileKind::Ole => "doc",
            FileKind::Ttf => "ttf",
            FileKind::Otf => "otf",
            FileKind::Elf => "elf",
            FileKind::Exe => "exe",
            FileKind::Swf => "swf",
            FileKind::Sqlite => "db",
            FileKind::Qcow => "qcow",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Shortest input worth inspecting.
const MIN_SIGNATURE_LEN: usize = 4;

/// Magic prefixes, checked in order. Longer and more specific prefixes come
/// before shorter ones that could shadow them.
const PREFIXES: &[(&[u8], FileKind)] = &[
    (b"\xFF\xD8\xFF", FileKind::Jpeg),
    (b"\x89PNG\r\n\x1a\n", FileKind::Png),
    (b"GIF89a", FileKind::Gif),
    (b"GIF87a", FileKind::Gif),
    (b"BM", FileKind::Bmp),
    (b"PK\x03\x04", FileKind::Zip),
    (b"\x1f\x8b\x08", FileKind::Gzip),
    (b"BZh", FileKind::Bzip2),
    (b"\xfd7zXZ\x00", FileKind::Xz),
    (b"\x28\xb5\x2f\xfd", FileKind::Zstd),
    (b"ustar\x0000", FileKind::Tar),
    (b"7z\xbc\xaf\x27\x1c", FileKind::SevenZip),
    (b"Rar!\x1a\x07", FileKind::Rar),
    (b"\x78\x9c", FileKind::Zlib),
    (b"ID3", FileKind::Mp3),
    (b"\xff\xfb", FileKind::Mp3),
    (b"\xff\xf3", FileKind::Mp3),
    (b"\xff\xf2", FileKind::Mp3),
    (b"fLaC", FileKind::Flac),
    (b"OggS", FileKind::Ogg),
    (b"\x00\x00\x01\xba", FileKind::Mpeg),
    (b"\x00\x00\x01\xb3", FileKind::Mpeg),
    (b"\x1a\x45\xdf\xa3", FileKind::Mkv),
    (b"ftyp", FileKind::Mp4),
    (b"3GP2", FileKind::ThreeGp),
    (b"%PDF", FileKind::Pdf),
    (b"<?xml", FileKind::Xml),
    (b"<html", FileKind::Html),
    (b"\xef\xbb\xbf", FileKind::Text),
    (b"%!", FileKind::PostScript),
    (b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", FileKind::Ole),
    (b"\x00\x01\x00\x00", FileKind::Ttf),
    (b"OTTO", FileKind::Otf),
    (b"\x7fELF", FileKind::Elf),
    (b"MZ", FileKind::Exe),
    (b"CWS", FileKind::Swf),
    (b"SQLite format 3\x00", FileKind::Sqlite),
    (b"QFI\xfb", FileKind::Qcow),
];

/// Identify the format of `data` from its leading bytes.
///
/// Returns `None` for inputs shorter than four bytes or with no known
/// signature.
pub fn classify(data: &[u8]) -> Option<FileKind> {
    if data.len() < MIN_SIGNATURE_LEN {
        return None;
    }

    if let Some((_, kind)) = PREFIXES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return Some(*kind);
    }

    classify_riff(data).or_else(|| classify_iso_media(data))
}

/// RIFF containers carry their form type at offset 8.
fn classify_riff(data: &[u8]) -> Option<FileKind> {
    if !data.starts_with(b"RIFF") {
        return None;
    }
    match data.get(8..12)? {
        b"WAVE" => Some(FileKind::Wav),
        b"AVI " => Some(FileKind::Avi),
        b"WEBP" => Some(FileKind::Webp),
        _ => None,
    }
}

/// ISO base media files open with a box whose type `ftyp` sits at offset 4,
/// followed by the major brand.
fn classify_iso_media(data: &[u8]) -> Option<FileKind> {
    if data.get(4..8)? != b"ftyp" {
        return None;
    }
    let kind = match data.get(8..12) {
        Some(b"M4V ") | Some(b"M4VH") | Some(b"M4VP") => FileKind::M4v,
        Some(b"M4A ") | Some(b"M4B ") => FileKind::M4a,
        Some(b"qt  ") => FileKind::Mov,
        Some(brand) if brand.starts_with(b"3g") => FileKind::ThreeGp,
        _ => FileKind::Mp4,
    };
    Some(kind)
}
