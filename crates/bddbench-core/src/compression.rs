//! Gzip handling for write request bodies

use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::workload::Compression;

/// Encoded write body together with the `Content-Encoding` it needs.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub bytes: Bytes,
    pub gzip: bool,
}

/// Prepares a line protocol body for the wire.
///
/// # Errors
///
/// Returns the underlying I/O error if the gzip stream cannot be finished.
pub fn encode_body(body: &str, compression: Compression) -> io::Result<EncodedBody> {
    match compression {
        Compression::None => Ok(EncodedBody {
            bytes: Bytes::copy_from_slice(body.as_bytes()),
            gzip: false,
        }),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), GzLevel::default());
            encoder.write_all(body.as_bytes())?;
            Ok(EncodedBody {
                bytes: Bytes::from(encoder.finish()?),
                gzip: true,
            })
        }
    }
}

/// Decodes a request body, inflating it when `gzip` is set.
///
/// # Errors
///
/// Returns an error for corrupt gzip streams or non UTF-8 payloads.
pub fn decode_body(bytes: &[u8], gzip: bool) -> io::Result<String> {
    if !gzip {
        return String::from_utf8(bytes.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
    }
    let mut decoder = GzDecoder::new(bytes);
    let mut body = String::new();
    decoder.read_to_string(&mut body)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_body_shrinks_repetitive_payloads() {
        let body = "cpu,device_id=dev-1 value=1 1\n".repeat(500);
        let encoded = encode_body(&body, Compression::Gzip).unwrap();
        assert!(encoded.gzip);
        assert!(encoded.bytes.len() < body.len() / 5);
        assert_eq!(decode_body(&encoded.bytes, true).unwrap(), body);
    }

    #[test]
    fn plain_body_is_passed_through() {
        let encoded = encode_body("cpu v=1 1", Compression::None).unwrap();
        assert!(!encoded.gzip);
        assert_eq!(&encoded.bytes[..], b"cpu v=1 1");
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        assert!(decode_body(b"not gzip", true).is_err());
    }
}
