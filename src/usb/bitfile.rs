//! Minimal Xilinx `.bit` file parser: just enough structure
//! (`design_name`, `part_name`, and the raw bitstream payload) for
//! `usb::jtag`'s chain verification and the injected
//! [`crate::usb::jtag::ChainProgrammer`] to act on. The original
//! parses the same container format via `xc3sprog::BitFile`.

use std::path::Path;

use crate::error::ProgramError;

#[derive(Debug, Clone)]
pub struct Bitfile {
    pub design_name: String,
    pub part_name: String,
    pub data: Vec<u8>,
}

const HEADER_MAGIC: [u8; 13] =
    [0x00, 0x09, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x0f, 0xf0, 0x00, 0x00, 0x01];

impl Bitfile {
    pub fn read(path: impl AsRef<Path>) -> Result<Bitfile, ProgramError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|source| ProgramError::OpenBitfile { path: path.to_path_buf(), source })?;
        Self::parse(&bytes, path)
    }

    fn parse(bytes: &[u8], path: &Path) -> Result<Bitfile, ProgramError> {
        let malformed = |reason: &str| ProgramError::MalformedBitfile {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_MAGIC.len() || bytes[..HEADER_MAGIC.len()] != HEADER_MAGIC {
            return Err(malformed("missing .bit container header"));
        }

        let mut cursor = &bytes[HEADER_MAGIC.len()..];
        let mut design_name = None;
        let mut part_name = None;
        let mut data = None;

        loop {
            let Some((&tag, rest)) = cursor.split_first() else {
                break;
            };
            cursor = rest;
            match tag {
                b'a' | b'b' | b'c' | b'd' => {
                    let (field, rest) = read_field_string(cursor, &malformed)?;
                    cursor = rest;
                    match tag {
                        b'a' => design_name = Some(field),
                        b'b' => part_name = Some(field),
                        _ => {}
                    }
                }
                b'e' => {
                    let (len, rest) = read_u32(cursor, &malformed)?;
                    let len = len as usize;
                    if rest.len() < len {
                        return Err(malformed("truncated bitstream payload"));
                    }
                    data = Some(rest[..len].to_vec());
                    break;
                }
                other => return Err(malformed(&format!("unknown section tag {other:#04x}"))),
            }
        }

        Ok(Bitfile {
            design_name: design_name.ok_or_else(|| malformed("missing design name field"))?,
            part_name: part_name.ok_or_else(|| malformed("missing part name field"))?,
            data: data.ok_or_else(|| malformed("missing bitstream payload"))?,
        })
    }
}

fn read_u16<'a>(
    cursor: &'a [u8],
    malformed: &impl Fn(&str) -> ProgramError,
) -> Result<(u16, &'a [u8]), ProgramError> {
    if cursor.len() < 2 {
        return Err(malformed("truncated length field"));
    }
    let (len_bytes, rest) = cursor.split_at(2);
    Ok((u16::from_be_bytes([len_bytes[0], len_bytes[1]]), rest))
}

fn read_u32<'a>(
    cursor: &'a [u8],
    malformed: &impl Fn(&str) -> ProgramError,
) -> Result<(u32, &'a [u8]), ProgramError> {
    if cursor.len() < 4 {
        return Err(malformed("truncated length field"));
    }
    let (len_bytes, rest) = cursor.split_at(4);
    Ok((u32::from_be_bytes(len_bytes.try_into().unwrap()), rest))
}

fn read_field_string<'a>(
    cursor: &'a [u8],
    malformed: &impl Fn(&str) -> ProgramError,
) -> Result<(String, &'a [u8]), ProgramError> {
    let (len, rest) = read_u16(cursor, malformed)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(malformed("truncated string field"));
    }
    let (field_bytes, rest) = rest.split_at(len);
    let trimmed = field_bytes.strip_suffix(&[0]).unwrap_or(field_bytes);
    let field = String::from_utf8(trimmed.to_vec())
        .map_err(|_| malformed("string field is not valid utf-8"))?;
    Ok((field, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_bitfile(design: &str, part: &str, data: &[u8]) -> Vec<u8> {
        let mut out = HEADER_MAGIC.to_vec();
        for (tag, value) in [(b'a', design), (b'b', part), (b'c', "2026/07/26"), (b'd', "00:00:00")]
        {
            out.push(tag);
            let bytes = [value.as_bytes(), &[0]].concat();
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out.push(b'e');
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn parses_well_formed_bitfile() {
        let bytes = build_bitfile("top", "6slx9", &[0xff, 0x00, 0xaa]);
        let bf = Bitfile::parse(&bytes, Path::new("test.bit")).unwrap();
        assert_eq!(bf.design_name, "top");
        assert_eq!(bf.part_name, "6slx9");
        assert_eq!(bf.data, vec![0xff, 0x00, 0xaa]);
    }

    #[test]
    fn rejects_bad_header() {
        let err = Bitfile::parse(&[0u8; 20], Path::new("test.bit")).unwrap_err();
        assert!(matches!(err, ProgramError::MalformedBitfile { .. }));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut bytes = build_bitfile("top", "6slx9", &[1, 2, 3, 4]);
        bytes.truncate(bytes.len() - 2);
        let err = Bitfile::parse(&bytes, Path::new("test.bit")).unwrap_err();
        assert!(matches!(err, ProgramError::MalformedBitfile { .. }));
    }
}
