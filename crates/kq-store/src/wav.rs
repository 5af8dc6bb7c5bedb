//! RIFF/WAVE decoding into `Pcm` and encoding of rendered audio.

use std::io::{Cursor, Seek, SeekFrom};

use binrw::{BinRead, BinReaderExt, BinWrite};
use kq_ir::{FormatError, Pcm};

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xfffe;

#[derive(BinRead, BinWrite, Debug)]
#[brw(little, magic = b"RIFF")]
struct RiffHeader {
    size: u32,
    form: [u8; 4],
}

#[derive(BinRead, BinWrite, Debug)]
#[brw(little)]
struct ChunkHeader {
    id: [u8; 4],
    size: u32,
}

#[derive(BinRead, BinWrite, Debug, Clone, Copy)]
#[brw(little)]
struct FmtChunk {
    format: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

/// `WAVE_FORMAT_EXTENSIBLE` tail; only the leading tag of the GUID matters.
#[derive(BinRead, Debug)]
#[br(little)]
struct FmtExtension {
    _cb_size: u16,
    _valid_bits: u16,
    _channel_mask: u32,
    sub_format: u16,
}

fn wav_err(e: impl core::fmt::Display) -> FormatError {
    FormatError::Wav(e.to_string())
}

/// Decode a RIFF/WAVE file: integer PCM of 8, 16, 24 or 32 bits, or
/// 32-bit float. Channels beyond the first two are dropped.
pub fn decode(bytes: &[u8]) -> Result<Pcm, FormatError> {
    let mut cur = Cursor::new(bytes);
    let riff: RiffHeader = cur.read_le().map_err(wav_err)?;
    if &riff.form != b"WAVE" {
        return Err(FormatError::Wav("not a WAVE file".into()));
    }

    let mut fmt: Option<(FmtChunk, u16)> = None;
    let mut data: Option<(usize, usize)> = None;
    while (cur.position() as usize) + 8 <= bytes.len() {
        let chunk: ChunkHeader = cur.read_le().map_err(wav_err)?;
        let body = cur.position();
        match &chunk.id {
            b"fmt " => {
                let f: FmtChunk = cur.read_le().map_err(wav_err)?;
                let mut format = f.format;
                if format == FORMAT_EXTENSIBLE && chunk.size >= 26 {
                    let ext: FmtExtension = cur.read_le().map_err(wav_err)?;
                    format = ext.sub_format;
                }
                fmt = Some((f, format));
            }
            b"data" => {
                let start = body as usize;
                let len = (chunk.size as usize).min(bytes.len().saturating_sub(start));
                data = Some((start, len));
            }
            _ => {}
        }
        let next = body + chunk.size as u64 + (chunk.size as u64 & 1);
        cur.seek(SeekFrom::Start(next)).map_err(wav_err)?;
    }

    let (fmt, format) = fmt.ok_or_else(|| FormatError::Wav("missing fmt chunk".into()))?;
    let (start, len) = data.ok_or_else(|| FormatError::Wav("missing data chunk".into()))?;
    if fmt.channels == 0 {
        return Err(FormatError::Wav("zero channels".into()));
    }
    let raw = &bytes[start..start + len];
    let channels = fmt.channels as usize;
    let width = (fmt.bits_per_sample as usize).div_ceil(8);

    let read: fn(&[u8]) -> f32 = match (format, fmt.bits_per_sample) {
        (FORMAT_PCM, 8) => |b| (b[0] as f32 - 128.0) / 128.0,
        (FORMAT_PCM, 16) => |b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
        (FORMAT_PCM, 24) => |b| (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_608.0,
        (FORMAT_PCM, 32) => |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0,
        (FORMAT_FLOAT, 32) => |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        (format, bits) => {
            return Err(FormatError::Wav(format!(
                "unsupported sample format {} with {} bits",
                format, bits
            )))
        }
    };

    let frames = raw.len() / (width * channels);
    let kept = channels.min(2);
    let mut planes: Vec<Vec<f32>> = Vec::with_capacity(kept);
    for _ in 0..kept {
        let mut plane = Vec::new();
        plane
            .try_reserve_exact(frames)
            .map_err(|_| FormatError::Wav("sample data too large".into()))?;
        planes.push(plane);
    }
    for frame in raw.chunks_exact(width * channels) {
        for (ch, plane) in planes.iter_mut().enumerate() {
            plane.push(read(&frame[ch * width..(ch + 1) * width]));
        }
    }
    Ok(Pcm::new(Some(fmt.sample_rate), planes))
}

/// Output sample encoding for `encode`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WavFormat {
    #[default]
    Int16,
    Float32,
}

/// Encode planar channels as an interleaved RIFF/WAVE file. All channels
/// must have the same length.
pub fn encode(channels: &[&[f32]], sample_rate: u32, format: WavFormat) -> Vec<u8> {
    let num_channels = channels.len() as u16;
    let frames = channels.first().map_or(0, |c| c.len());
    let (tag, bits) = match format {
        WavFormat::Int16 => (FORMAT_PCM, 16u16),
        WavFormat::Float32 => (FORMAT_FLOAT, 32u16),
    };
    let block_align = num_channels * (bits / 8);
    let data_size = (frames * block_align as usize) as u32;

    let mut cur = Cursor::new(Vec::with_capacity(44 + data_size as usize));
    let headers = (
        RiffHeader {
            size: 36 + data_size,
            form: *b"WAVE",
        },
        ChunkHeader {
            id: *b"fmt ",
            size: 16,
        },
        FmtChunk {
            format: tag,
            channels: num_channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample: bits,
        },
        ChunkHeader {
            id: *b"data",
            size: data_size,
        },
    );
    // Writing into a Vec-backed cursor cannot fail.
    let _ = headers.0.write(&mut cur);
    let _ = headers.1.write(&mut cur);
    let _ = headers.2.write(&mut cur);
    let _ = headers.3.write(&mut cur);

    let mut out = cur.into_inner();
    for i in 0..frames {
        for ch in channels {
            let s = ch.get(i).copied().unwrap_or(0.0);
            match format {
                WavFormat::Int16 => {
                    let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                WavFormat::Float32 => out.extend_from_slice(&s.to_le_bytes()),
            }
        }
    }
    out
}
