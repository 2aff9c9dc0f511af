use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"BSDIFF40";
pub const HEADER_LEN: usize = 32;

/// One control triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    /// Bytes of the diff stream added to source bytes.
    pub add: u64,
    /// Bytes copied verbatim from the extra stream.
    pub copy: u64,
    /// Signed source-position adjustment applied after the copy.
    pub seek: i64,
}

/// The 32-byte header: magic, control length, diff length, output length.
/// Integers use bsdiff's sign-magnitude encoding. Three bzip2 streams follow
/// (control, diff, extra); the extra stream runs to the end of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub control_len: u64,
    pub diff_len: u64,
    pub new_size: u64,
}

impl Header {
    pub fn parse(patch: &[u8]) -> Result<Self> {
        if patch.len() < HEADER_LEN {
            return Err(Error::malformed(format!(
                "payload of {} bytes is shorter than the header",
                patch.len()
            )));
        }
        if &patch[..8] != MAGIC {
            return Err(Error::malformed("missing BSDIFF40 magic"));
        }

        let control_len = offtin(&patch[8..16]);
        let diff_len = offtin(&patch[16..24]);
        let new_size = offtin(&patch[24..32]);
        if control_len < 0 || diff_len < 0 || new_size < 0 {
            return Err(Error::malformed(format!(
                "negative header field: control={}, diff={}, output={}",
                control_len, diff_len, new_size
            )));
        }

        let header = Self {
            control_len: control_len as u64,
            diff_len: diff_len as u64,
            new_size: new_size as u64,
        };
        let streams_end = (HEADER_LEN as u64)
            .checked_add(header.control_len)
            .and_then(|n| n.checked_add(header.diff_len));
        match streams_end {
            Some(end) if end <= patch.len() as u64 => Ok(header),
            _ => Err(Error::malformed(format!(
                "stream lengths (control={}, diff={}) exceed the {}-byte payload",
                header.control_len,
                header.diff_len,
                patch.len()
            ))),
        }
    }
}

/// Reconstruct the new content from `source` and a BSDIFF40 payload.
pub fn apply(source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let header = Header::parse(patch)?;
    // Entry sizes are 32-bit, so no valid payload declares more.
    if header.new_size > u32::MAX as u64 {
        return Err(Error::malformed(format!(
            "declared output length {} exceeds the entry size limit",
            header.new_size
        )));
    }
    let new_size = header.new_size as usize;

    let control_end = HEADER_LEN + header.control_len as usize;
    let diff_end = control_end + header.diff_len as usize;
    let mut control = BzDecoder::new(&patch[HEADER_LEN..control_end]);
    let mut diff = BzDecoder::new(&patch[control_end..diff_end]);
    let mut extra = BzDecoder::new(&patch[diff_end..]);

    let mut output = vec![0u8; new_size];
    let mut new_pos: usize = 0;
    let mut old_pos: i64 = 0;

    while new_pos < new_size {
        let ctrl = read_control(&mut control, new_pos, new_size)?;
        let add = checked_len(ctrl.add, new_pos, new_size, "add")?;

        read_stream(&mut diff, &mut output[new_pos..new_pos + add], "diff")?;

        if add > 0 {
            let start = usize::try_from(old_pos).ok().filter(|&s| s + add <= source.len());
            let start = start.ok_or_else(|| {
                Error::malformed(format!(
                    "mix of {} bytes at source offset {} reads outside the {}-byte source",
                    add,
                    old_pos,
                    source.len()
                ))
            })?;
            for (out, &old) in output[new_pos..new_pos + add]
                .iter_mut()
                .zip(&source[start..start + add])
            {
                *out = out.wrapping_add(old);
            }
        }
        new_pos += add;
        old_pos += add as i64;

        let copy = checked_len(ctrl.copy, new_pos, new_size, "copy")?;
        read_stream(&mut extra, &mut output[new_pos..new_pos + copy], "extra")?;
        new_pos += copy;

        old_pos = old_pos
            .checked_add(ctrl.seek)
            .ok_or_else(|| Error::malformed(format!("seek overflow at source offset {}", old_pos)))?;
    }

    Ok(output)
}

/// Encode a payload from precomputed streams. Used to build fixtures; this does
/// not search for matches.
pub fn pack(new_size: u64, controls: &[Control], diff: &[u8], extra: &[u8]) -> Result<Vec<u8>> {
    let mut raw_control = Vec::with_capacity(controls.len() * 24);
    for ctrl in controls {
        raw_control.extend_from_slice(&offtout(to_signed(ctrl.add)?));
        raw_control.extend_from_slice(&offtout(to_signed(ctrl.copy)?));
        raw_control.extend_from_slice(&offtout(ctrl.seek));
    }

    let control = compress(&raw_control)?;
    let diff = compress(diff)?;
    let extra = compress(extra)?;

    let mut out = Vec::with_capacity(HEADER_LEN + control.len() + diff.len() + extra.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&offtout(control.len() as i64));
    out.extend_from_slice(&offtout(diff.len() as i64));
    out.extend_from_slice(&offtout(to_signed(new_size)?));
    out.extend_from_slice(&control);
    out.extend_from_slice(&diff);
    out.extend_from_slice(&extra);
    Ok(out)
}

fn read_control<R: Read>(reader: &mut R, new_pos: usize, new_size: usize) -> Result<Control> {
    let mut buf = [0u8; 24];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::malformed(format!(
                "control stream ended at output offset {} of {}",
                new_pos, new_size
            ))
        } else {
            Error::malformed(format!("control stream: {}", e))
        }
    })?;

    let add = offtin(&buf[0..8]);
    let copy = offtin(&buf[8..16]);
    if add < 0 || copy < 0 {
        return Err(Error::malformed(format!(
            "negative control length: add={}, copy={}",
            add, copy
        )));
    }
    Ok(Control {
        add: add as u64,
        copy: copy as u64,
        seek: offtin(&buf[16..24]),
    })
}

fn checked_len(len: u64, new_pos: usize, new_size: usize, what: &str) -> Result<usize> {
    usize::try_from(len)
        .ok()
        .filter(|&n| n <= new_size - new_pos)
        .ok_or_else(|| {
            Error::malformed(format!(
                "{} of {} bytes at output offset {} overruns the {}-byte output",
                what, len, new_pos, new_size
            ))
        })
}

fn read_stream<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| Error::malformed(format!("{} stream: {}", what, e)))
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn to_signed(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::invalid_input(format!("length {} out of range", n)))
}

/// Sign-magnitude little-endian, as written by bsdiff.
fn offtin(buf: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    let y = i64::from_le_bytes(bytes);
    if y & (1 << 63) == 0 {
        y
    } else {
        -(y & !(1 << 63))
    }
}

fn offtout(x: i64) -> [u8; 8] {
    if x < 0 {
        (x.unsigned_abs() | (1 << 63)).to_le_bytes()
    } else {
        x.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offtin_sign_magnitude() {
        assert_eq!(offtin(&[42, 0, 0, 0, 0, 0, 0, 0]), 42);
        assert_eq!(offtin(&[42, 0, 0, 0, 0, 0, 0, 0x80]), -42);
        assert_eq!(offtin(&offtout(-1234567)), -1234567);
        assert_eq!(offtin(&offtout(0)), 0);
    }

    #[test]
    fn test_apply_extra_only() {
        let new = b"Brand new content";
        let patch = pack(
            new.len() as u64,
            &[Control { add: 0, copy: new.len() as u64, seek: 0 }],
            &[],
            new,
        )
        .unwrap();
        assert_eq!(apply(b"", &patch).unwrap(), new);
    }

    #[test]
    fn test_apply_mix_and_extra() {
        let old = b"AAAA_BBBB_CCCC";
        let new = b"AAAB_XXXX_CCCC";

        // Mix the first 4 bytes, insert "_XXXX_", skip "_BBBB_" in the source, mix the tail.
        let mut diff: Vec<u8> = new[..4].iter().zip(&old[..4]).map(|(n, o)| n.wrapping_sub(*o)).collect();
        diff.extend(new[10..].iter().zip(&old[10..]).map(|(n, o)| n.wrapping_sub(*o)));
        let patch = pack(
            new.len() as u64,
            &[
                Control { add: 4, copy: 6, seek: 6 },
                Control { add: 4, copy: 0, seek: 0 },
            ],
            &diff,
            b"_XXXX_",
        )
        .unwrap();

        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_negative_seek() {
        let old = b"0123456789";
        let new = b"01230123";
        let patch = pack(
            8,
            &[
                Control { add: 4, copy: 0, seek: -4 },
                Control { add: 4, copy: 0, seek: 0 },
            ],
            &[0; 8],
            &[],
        )
        .unwrap();
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_zero_length_output() {
        let patch = pack(0, &[], &[], &[]).unwrap();
        assert!(apply(b"anything", &patch).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_control_stream() {
        // Declares 100 output bytes but the controls only cover 10.
        let patch = pack(100, &[Control { add: 10, copy: 0, seek: 0 }], &[0; 10], &[]).unwrap();
        let err = apply(&[1u8; 100], &patch).unwrap_err();
        assert!(matches!(err, Error::MalformedPatch(_)), "{err}");
    }

    #[test]
    fn test_mix_past_source_end() {
        let patch = pack(8, &[Control { add: 8, copy: 0, seek: 0 }], &[0; 8], &[]).unwrap();
        assert!(matches!(apply(b"short", &patch), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn test_seek_before_source_start() {
        let patch = pack(
            4,
            &[
                Control { add: 2, copy: 0, seek: -5 },
                Control { add: 2, copy: 0, seek: 0 },
            ],
            &[0; 4],
            &[],
        )
        .unwrap();
        assert!(matches!(apply(b"abcdef", &patch), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn test_control_overruns_output() {
        let patch = pack(4, &[Control { add: 0, copy: 8, seek: 0 }], &[], &[0; 8]).unwrap();
        assert!(matches!(apply(b"", &patch), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn test_short_extra_stream() {
        let patch = pack(8, &[Control { add: 0, copy: 8, seek: 0 }], &[], &[0; 3]).unwrap();
        assert!(matches!(apply(b"", &patch), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn test_bad_header() {
        assert!(matches!(apply(b"", b"BSDIFF40"), Err(Error::MalformedPatch(_))));

        let mut patch = pack(0, &[], &[], &[]).unwrap();
        patch[..8].copy_from_slice(b"NOTDIFF!");
        assert!(matches!(apply(b"", &patch), Err(Error::MalformedPatch(_))));

        let mut patch = pack(0, &[], &[], &[]).unwrap();
        patch[8..16].copy_from_slice(&offtout(1 << 40));
        assert!(matches!(apply(b"", &patch), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn test_corrupt_stream_data() {
        let mut patch = pack(16, &[Control { add: 0, copy: 16, seek: 0 }], &[], &[7; 16]).unwrap();
        // Break the control stream's bzip2 signature.
        patch[HEADER_LEN] ^= 0xFF;
        assert!(matches!(apply(b"", &patch), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn test_deterministic() {
        let old: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        let diff: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let patch = pack(
            4096 + 3,
            &[Control { add: 4096, copy: 3, seek: 0 }],
            &diff,
            b"end",
        )
        .unwrap();
        let first = apply(&old, &patch).unwrap();
        for _ in 0..3 {
            assert_eq!(apply(&old, &patch).unwrap(), first);
        }
    }
}
