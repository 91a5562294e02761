//! Framing codec for the backing file.
//!
//! The file is zero or more length-delimited records concatenated in
//! write order: a 4-byte big-endian length prefix followed by that many
//! bytes of JSON encoding one [`Subscription`]. Readers consume records
//! until end-of-stream; an empty stream is zero subscriptions.

use std::io::{self, Read, Write};

use crate::model::Subscription;

/// Upper bound on a single record's body, to reject absurd length
/// prefixes read from a corrupt file before allocating.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Errors raised by the framing codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended mid-record (inside a length prefix or body).
    #[error("truncated record: {0}")]
    Truncated(String),

    /// A length prefix exceeded [`MAX_RECORD_LEN`].
    #[error("record length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    /// A record body is not valid JSON for a subscription.
    #[error("undecodable record: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Read every framed subscription record until end-of-stream.
pub fn read_subscriptions<R: Read>(reader: &mut R) -> Result<Vec<Subscription>, CodecError> {
    let mut subscriptions = Vec::new();

    loop {
        let mut prefix = [0u8; 4];

        // The first prefix byte distinguishes a clean end-of-stream from
        // a truncation inside a record.
        match reader.read_exact(&mut prefix[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(CodecError::Io(e)),
        }
        read_fully(reader, &mut prefix[1..], "length prefix")?;

        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_RECORD_LEN {
            return Err(CodecError::Oversized {
                len,
                max: MAX_RECORD_LEN,
            });
        }

        let mut body = vec![0u8; len];
        read_fully(reader, &mut body, "record body")?;

        subscriptions.push(serde_json::from_slice(&body).map_err(CodecError::Decode)?);
    }

    Ok(subscriptions)
}

/// Write subscriptions as framed records, in order.
pub fn write_subscriptions<W: Write>(
    writer: &mut W,
    subscriptions: &[Subscription],
) -> Result<(), CodecError> {
    for subscription in subscriptions {
        let body = serde_json::to_vec(subscription).map_err(CodecError::Decode)?;
        if body.len() > MAX_RECORD_LEN {
            return Err(CodecError::Oversized {
                len: body.len(),
                max: MAX_RECORD_LEN,
            });
        }
        writer.write_all(&(body.len() as u32).to_be_bytes())?;
        writer.write_all(&body)?;
    }
    Ok(())
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), CodecError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(CodecError::Truncated(format!("end of stream inside {what}")))
        }
        Err(e) => Err(CodecError::Io(e)),
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
