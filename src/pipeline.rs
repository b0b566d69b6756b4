use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use oxipng::StripChunks;
use tempfile::Builder as TempFileBuilder;

use crate::error::JobError;
use crate::formats::ImageFormatKind;
use crate::rename::RenamePattern;
use crate::scanner::FileEntry;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Ancillary chunks carried from a PNG source into a PNG output when
/// metadata is preserved. The ICC profile travels through the encoder.
const CARRIED_CHUNKS: [[u8; 4]; 6] = [*b"tEXt", *b"zTXt", *b"iTXt", *b"eXIf", *b"pHYs", *b"tIME"];

pub fn strip_policy(keep_metadata: bool) -> StripChunks {
    if keep_metadata {
        StripChunks::None
    } else {
        StripChunks::Safe
    }
}

/// How one conversion run names its outputs.
#[derive(Debug, Clone, Copy)]
pub struct OutputNaming<'a> {
    /// `None` writes next to each source.
    pub output_root: Option<&'a Path>,
    pub pattern: Option<&'a RenamePattern>,
    pub suffix: &'a str,
    pub format: ImageFormatKind,
    /// Run start, shared by every `{date}` and `{time}`.
    pub started: NaiveDateTime,
    pub counter_width: usize,
}

/// `<output root or source dir>/<relative parent>/<stem><suffix>.<ext>`,
/// where the stem comes from the name pattern when one is set.
/// `counter` is the file's 1-based position in scan order.
pub fn derive_output_path(entry: &FileEntry, counter: usize, naming: &OutputNaming<'_>) -> PathBuf {
    let parent = match naming.output_root {
        Some(root) => match entry.relative.parent() {
            Some(relative_parent) => root.join(relative_parent),
            None => root.to_path_buf(),
        },
        None => entry
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let mut name = match naming.pattern {
        Some(pattern) => OsString::from(pattern.render(
            &entry.stem().to_string_lossy(),
            counter,
            naming.counter_width,
            naming.started,
        )),
        None => OsString::from(entry.stem()),
    };
    name.push(naming.suffix);
    name.push(".");
    name.push(naming.format.extension());
    parent.join(name)
}

/// Writes through a temporary file in the target directory, syncs it, then
/// moves it into place without replacing anything already there and syncs
/// the directory. The temporary file is removed on every failure path.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), JobError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if !parent.exists() {
        fs::create_dir_all(parent)
            .map_err(|err| JobError::io("creating output directory", parent, err))?;
    }

    let mut temp_file = TempFileBuilder::new()
        .prefix(".pixbatch-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| JobError::io("creating temporary file in", parent, err))?;

    temp_file
        .write_all(data)
        .map_err(|err| JobError::io("writing temporary output for", path, err))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|err| JobError::io("syncing temporary output for", path, err))?;

    temp_file.persist_noclobber(path).map_err(|err| {
        if err.error.kind() == ErrorKind::AlreadyExists {
            JobError::OutputCollision {
                path: path.to_path_buf(),
            }
        } else {
            JobError::io("persisting", path, err.error)
        }
    })?;
    sync_directory(parent)
        .map_err(|err| JobError::io("syncing output directory", parent, err))?;

    Ok(())
}

/// Makes a completed rename inside `dir` survive a crash.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Raw ancillary chunks (length, type, data and CRC) worth carrying forward.
/// Anything that is not a well-formed PNG yields nothing.
pub fn carried_png_chunks(data: &[u8]) -> Vec<Vec<u8>> {
    png_chunks(data)
        .filter(|chunk| CARRIED_CHUNKS.contains(&chunk.name))
        .map(|chunk| chunk.raw.to_vec())
        .collect()
}

pub fn png_chunk_names(data: &[u8]) -> Vec<[u8; 4]> {
    png_chunks(data).map(|chunk| chunk.name).collect()
}

/// Inserts raw chunks straight after IHDR. Copying the stored CRC is valid
/// because it only covers the chunk type and data.
pub fn splice_png_chunks(encoded: &[u8], chunks: &[Vec<u8>]) -> Vec<u8> {
    let Some(ihdr) = png_chunks(encoded).next().filter(|chunk| &chunk.name == b"IHDR") else {
        return encoded.to_vec();
    };
    let present = png_chunk_names(encoded);
    let insert_at = ihdr.offset + ihdr.raw.len();

    let mut output = Vec::with_capacity(encoded.len() + chunks.iter().map(Vec::len).sum::<usize>());
    output.extend_from_slice(&encoded[..insert_at]);
    for chunk in chunks {
        let unique_kind = matches!(chunk.get(4..8), Some(b"pHYs" | b"tIME" | b"eXIf"));
        let already_there = chunk
            .get(4..8)
            .and_then(|name| <[u8; 4]>::try_from(name).ok())
            .is_some_and(|name| present.contains(&name));
        if unique_kind && already_there {
            continue;
        }
        output.extend_from_slice(chunk);
    }
    output.extend_from_slice(&encoded[insert_at..]);
    output
}

struct PngChunk<'a> {
    name: [u8; 4],
    offset: usize,
    raw: &'a [u8],
}

fn png_chunks(data: &[u8]) -> impl Iterator<Item = PngChunk<'_>> {
    let mut index = if data.starts_with(&PNG_SIGNATURE) {
        PNG_SIGNATURE.len()
    } else {
        data.len()
    };

    std::iter::from_fn(move || {
        let header = data.get(index..index + 8)?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let name = [header[4], header[5], header[6], header[7]];
        let end = index.checked_add(12)?.checked_add(length)?;
        let raw = data.get(index..end)?;
        let chunk = PngChunk {
            name,
            offset: index,
            raw,
        };
        index = if &name == b"IEND" { data.len() } else { end };
        Some(chunk)
    })
}
