#![allow(dead_code)]

use std::convert::TryInto;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use assert_fs::TempDir;
use assert_fs::fixture::PathChild;
use png::chunk;
use png::{BitDepth, ColorType, Compression, Decoder, Encoder, Transformations};

use pixbatch::{
    BatchEngine, CodecError, EncodeSettings, HistoryRecorder, ImageCodec, Raster, RasterCodec,
    ResizeFilter,
};

#[derive(Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Engine whose history log lives inside `dir`.
pub fn engine(dir: &TempDir) -> BatchEngine {
    BatchEngine::new(HistoryRecorder::new(history_path(dir)))
}

pub fn engine_with_codec(dir: &TempDir, codec: impl ImageCodec + 'static) -> BatchEngine {
    BatchEngine::with_codec(std::sync::Arc::new(codec), HistoryRecorder::new(history_path(dir)))
}

pub fn history_path(dir: &TempDir) -> PathBuf {
    dir.child("state/history.jsonl").path().to_path_buf()
}

pub fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
    let pixels = noisy_pixels(width, height, 0);
    write_rgba_png(dir, name, width, height, &pixels, &[])
}

/// Same dimensions as `write_png`, different pixels.
pub fn write_png_variant(dir: &TempDir, name: &str, width: u32, height: u32, seed: u8) -> PathBuf {
    let pixels = noisy_pixels(width, height, seed);
    write_rgba_png(dir, name, width, height, &pixels, &[])
}

/// 4x4 PNG carrying pHYs and tEXt ancillary chunks.
pub fn write_png_with_text(dir: &TempDir, name: &str) -> PathBuf {
    let phys: [u8; 9] = [0, 0, 0x0B, 0x13, 0, 0, 0x0B, 0x13, 1];
    let pixels = noisy_pixels(4, 4, 7);
    write_rgba_png(
        dir,
        name,
        4,
        4,
        &pixels,
        &[(chunk::pHYs, &phys[..]), (chunk::tEXt, &b"Comment\0holiday"[..])],
    )
}

pub fn write_bytes(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.child(name).path().to_path_buf();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create fixture directory");
    }
    fs::write(&path, bytes).expect("failed to write fixture bytes");
    path
}

pub fn chunk_names(path: &Path) -> Vec<[u8; 4]> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let data = fs::read(path).expect("failed to read PNG");
    assert!(data.starts_with(&SIGNATURE), "{} is not a PNG", path.display());

    let mut index = SIGNATURE.len();
    let mut names = Vec::new();
    while index + 8 <= data.len() {
        let length = u32::from_be_bytes(data[index..index + 4].try_into().unwrap()) as usize;
        index += 4;
        let name: [u8; 4] = data[index..index + 4].try_into().unwrap();
        index += 4;
        names.push(name);
        index += length + 4;
        if name == *b"IEND" {
            break;
        }
    }

    names
}

pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path)
        .unwrap_or_else(|err| panic!("failed to read metadata for {}: {err}", path.display()))
        .len()
}

pub fn decode_rgba(path: &Path) -> DecodedImage {
    let file =
        File::open(path).unwrap_or_else(|err| panic!("failed to open {}: {err}", path.display()));
    let mut decoder = Decoder::new(file);
    decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
    let mut reader = decoder.read_info().expect("failed to read PNG info");
    let mut buffer = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buffer)
        .expect("failed to read PNG frame");
    let raw = &buffer[..info.buffer_size()];
    let data = match info.color_type {
        ColorType::Rgba => raw.to_vec(),
        ColorType::Rgb => raw
            .chunks_exact(3)
            .flat_map(|chunk| [chunk[0], chunk[1], chunk[2], 255])
            .collect(),
        other => panic!("unexpected color type {other:?} in {}", path.display()),
    };

    DecodedImage {
        width: info.width,
        height: info.height,
        data,
    }
}

/// Every file below `dir`, relative, sorted.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir(dir)
        .into_iter()
        .filter_map(|path| {
            path.strip_prefix(dir)
                .ok()
                .map(|rel| rel.to_string_lossy().into_owned())
        })
        .collect();
    names.sort();
    names
}

fn walkdir(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(walkdir(&path));
        } else {
            found.push(path);
        }
    }
    found
}

/// Delegates to the real codec after a pause in every decode.
pub struct SlowCodec(pub Duration);

impl ImageCodec for SlowCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Raster, CodecError> {
        thread::sleep(self.0);
        RasterCodec::new().decode(bytes)
    }

    fn resize(&self, raster: Raster, width: u32, height: u32, filter: ResizeFilter) -> Raster {
        RasterCodec::new().resize(raster, width, height, filter)
    }

    fn encode(&self, raster: &Raster, settings: &EncodeSettings) -> Result<Vec<u8>, CodecError> {
        RasterCodec::new().encode(raster, settings)
    }
}

/// Panics while encoding any image wider than `max_width`.
pub struct PickyCodec {
    pub max_width: u32,
}

impl ImageCodec for PickyCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Raster, CodecError> {
        RasterCodec::new().decode(bytes)
    }

    fn resize(&self, raster: Raster, width: u32, height: u32, filter: ResizeFilter) -> Raster {
        RasterCodec::new().resize(raster, width, height, filter)
    }

    fn encode(&self, raster: &Raster, settings: &EncodeSettings) -> Result<Vec<u8>, CodecError> {
        if raster.dimensions().0 > self.max_width {
            panic!("encoder blew up");
        }
        RasterCodec::new().encode(raster, settings)
    }
}

fn write_rgba_png(
    dir: &TempDir,
    name: &str,
    width: u32,
    height: u32,
    pixels: &[u8],
    extra_chunks: &[(png::chunk::ChunkType, &[u8])],
) -> PathBuf {
    let path = dir.child(name).path().to_path_buf();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create fixture directory");
    }
    let file = File::create(&path).expect("failed to create PNG");
    let mut writer = BufWriter::new(file);

    let mut encoder = Encoder::new(&mut writer, width, height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    encoder.set_compression(Compression::Fast);
    let mut png_writer = encoder.write_header().expect("failed to write PNG header");
    for (kind, data) in extra_chunks {
        png_writer
            .write_chunk(*kind, data)
            .expect("failed to write ancillary chunk");
    }
    png_writer
        .write_image_data(pixels)
        .expect("failed to write PNG pixels");
    png_writer.finish().expect("failed to finalize PNG");

    path
}

fn noisy_pixels(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let base = ((x * 37 + y * 19) % 256) as u8 ^ seed;
            pixels.extend_from_slice(&[base, base.wrapping_add(53), base.wrapping_add(101), 255]);
        }
    }
    pixels
}
