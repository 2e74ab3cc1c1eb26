//! Shelf log format parser using nom
//!
//! File format:
//! ```text
//! SHELF01\n
//! [version: u32 little-endian]
//! record*
//! ```
//!
//! Record format:
//! ```text
//! [op: u8]            b'+' put, b'-' delete
//! [id_len: u32 LE] [id: UTF-8]
//! [payload_len: u32 LE] [payload]      (put only)
//! ```

use nom::{
    combinator::map_res,
    error::ErrorKind,
    multi::length_data,
    number::streaming::{le_u32, u8 as op_byte},
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for shelf files
pub const SHELF_MAGIC: &[u8] = b"SHELF01\n";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Total header length in bytes
pub const HEADER_LEN: usize = SHELF_MAGIC.len() + 4;

const OP_PUT: u8 = b'+';
const OP_DELETE: u8 = b'-';

/// A single log record borrowed from the file contents
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    /// Insert or replace `id`
    Put {
        /// Record id
        id: &'a str,
        /// Opaque payload
        payload: &'a [u8],
    },
    /// Tombstone for `id`
    Delete {
        /// Record id
        id: &'a str,
    },
}

/// Result of scanning the record section of a file
#[derive(Debug)]
pub struct LogScan<'a> {
    /// Records with their absolute offset in the file
    pub records: Vec<(u64, Record<'a>)>,
    /// Length of the well-formed prefix, header included
    pub valid_len: u64,
    /// Whether an incomplete record was found at the end
    pub truncated: bool,
}

/// Parse the shelf file header and return the format version
///
/// A wrong magic is reported as [`Error::Corrupt`], an unknown version as
/// [`Error::IncompatibleVersion`].
pub fn parse_header(input: &[u8]) -> Result<u32> {
    if input.len() < HEADER_LEN {
        return Err(Error::Corrupt("input too short for header".to_string()));
    }

    if &input[..SHELF_MAGIC.len()] != SHELF_MAGIC {
        return Err(Error::Corrupt("invalid shelf magic header".to_string()));
    }

    let (_, version) = le_u32::<_, nom::error::Error<&[u8]>>(&input[SHELF_MAGIC.len()..HEADER_LEN])?;
    if version != FORMAT_VERSION {
        return Err(Error::IncompatibleVersion(version));
    }

    Ok(version)
}

/// Create a shelf file header
pub fn create_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(SHELF_MAGIC);
    header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    header
}

fn parse_id(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(length_data(le_u32), std::str::from_utf8)(input)
}

/// Parse a single record
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    let (rest, op) = op_byte(input)?;
    match op {
        OP_PUT => {
            let (rest, id) = parse_id(rest)?;
            let (rest, payload) = length_data(le_u32)(rest)?;
            Ok((rest, Record::Put { id, payload }))
        }
        OP_DELETE => {
            let (rest, id) = parse_id(rest)?;
            Ok((rest, Record::Delete { id }))
        }
        _ => Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Tag))),
    }
}

/// Scan every record after the header
///
/// An incomplete trailing record is reported through [`LogScan::truncated`]
/// rather than as an error, so a crash in the middle of an append only loses
/// that append.
pub fn scan_records(file: &[u8]) -> Result<LogScan<'_>> {
    parse_header(file)?;

    let mut records = Vec::new();
    let mut offset = HEADER_LEN;
    let mut input = &file[HEADER_LEN..];
    let mut truncated = false;

    while !input.is_empty() {
        match parse_record(input) {
            Ok((rest, record)) => {
                records.push((offset as u64, record));
                offset += input.len() - rest.len();
                input = rest;
            }
            Err(nom::Err::Incomplete(_)) => {
                truncated = true;
                break;
            }
            Err(_) => {
                return Err(Error::Corrupt(format!("malformed record at offset {}", offset)));
            }
        }
    }

    Ok(LogScan {
        records,
        valid_len: offset as u64,
        truncated,
    })
}

/// Encode a put record
pub fn encode_put(id: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 4 + id.len() + 4 + payload.len());
    buf.push(OP_PUT);
    buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
    buf.extend_from_slice(id.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a delete record
pub fn encode_delete(id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 4 + id.len());
    buf.push(OP_DELETE);
    buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
    buf.extend_from_slice(id.as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(records: &[Vec<u8>]) -> Vec<u8> {
        let mut file = create_header();
        for record in records {
            file.extend_from_slice(record);
        }
        file
    }

    #[test]
    fn test_parse_header() {
        let header = create_header();
        assert_eq!(parse_header(&header).unwrap(), FORMAT_VERSION);
        assert_eq!(header.len(), HEADER_LEN);
    }

    #[test]
    fn test_parse_header_invalid_magic() {
        let mut header = create_header();
        header[0] = b'X';

        assert!(matches!(parse_header(&header), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_parse_header_too_short() {
        let result = parse_header(b"SHELF01\n");
        assert!(matches!(result, Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_parse_header_future_version() {
        let mut header = SHELF_MAGIC.to_vec();
        header.extend_from_slice(&7u32.to_le_bytes());

        assert!(matches!(parse_header(&header), Err(Error::IncompatibleVersion(7))));
    }

    #[test]
    fn test_parse_put_and_delete() {
        let mut input = encode_put("42", b"payload");
        input.extend_from_slice(&encode_delete("42"));

        let (rest, first) = parse_record(&input).unwrap();
        assert_eq!(
            first,
            Record::Put {
                id: "42",
                payload: b"payload"
            }
        );

        let (rest, second) = parse_record(rest).unwrap();
        assert_eq!(second, Record::Delete { id: "42" });
        assert!(rest.is_empty());
    }

    #[test]
    fn test_scan_offsets() {
        let put = encode_put("a", b"1");
        let file = file_with(&[put.clone(), encode_delete("a")]);

        let scan = scan_records(&file).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.records[0].0, HEADER_LEN as u64);
        assert_eq!(scan.records[1].0, (HEADER_LEN + put.len()) as u64);
        assert_eq!(scan.valid_len, file.len() as u64);
        assert!(!scan.truncated);
    }

    #[test]
    fn test_scan_truncated_tail() {
        let put = encode_put("a", b"complete");
        let partial = encode_put("b", b"cut short");
        let mut file = file_with(&[put.clone()]);
        file.extend_from_slice(&partial[..partial.len() - 3]);

        let scan = scan_records(&file).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.truncated);
        assert_eq!(scan.valid_len, (HEADER_LEN + put.len()) as u64);
    }

    #[test]
    fn test_scan_garbage_record() {
        let file = file_with(&[b"?garbage".to_vec()]);
        assert!(matches!(scan_records(&file), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_scan_rejects_invalid_utf8_id() {
        let mut record = vec![b'-'];
        record.extend_from_slice(&2u32.to_le_bytes());
        record.extend_from_slice(&[0xff, 0xfe]);
        let file = file_with(&[record]);

        assert!(matches!(scan_records(&file), Err(Error::Corrupt(_))));
    }
}
