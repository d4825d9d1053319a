//! Line codec for the beanstalkd text protocol.
//!
//! Frame format:
//! ```text
//! command line   <name> [args...]\r\n
//! optional body  <bytes>\r\n          (put requests, RESERVED responses)
//! ```
//! The body length is announced in the preceding line and does not include
//! the trailing CRLF.

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::conn::Cause;
use crate::types::JobId;

/// Line terminator for commands, responses and bodies.
pub const CRLF: &[u8] = b"\r\n";

/// Longest response line accepted, terminator included.
pub const MAX_LINE_BYTES: u64 = 512;

/// A parsed server response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reserved { id: JobId, bytes: usize },
    Inserted(JobId),
    BuriedJob(JobId),
    Watching(u32),
    Using(String),
    Deleted,
    Released,
    Buried,
    TimedOut,
    DeadlineSoon,
    NotFound,
    NotIgnored,
    ExpectedCrlf,
    JobTooBig,
    Draining,
    OutOfMemory,
    InternalError,
    BadFormat,
    UnknownCommand,
}

impl Response {
    /// Map a response that does not answer the current command to a cause.
    pub fn into_cause(self) -> Cause {
        match self {
            Response::TimedOut => Cause::TimedOut,
            Response::DeadlineSoon => Cause::DeadlineSoon,
            Response::NotFound => Cause::NotFound,
            Response::NotIgnored => Cause::NotIgnored,
            Response::Buried | Response::BuriedJob(_) => Cause::Buried,
            Response::ExpectedCrlf => Cause::ExpectedCrlf,
            Response::JobTooBig => Cause::JobTooBig,
            Response::Draining => Cause::Draining,
            Response::OutOfMemory => Cause::OutOfMemory,
            Response::InternalError => Cause::InternalError,
            Response::BadFormat => Cause::BadFormat,
            Response::UnknownCommand => Cause::UnknownCommand,
            other => Cause::UnexpectedResponse(format!("{:?}", other)),
        }
    }
}

/// Parse one response line (without its CRLF).
pub fn parse_response(line: &str) -> Result<Response, Cause> {
    let unexpected = || Cause::UnexpectedResponse(line.to_string());
    let mut parts = line.split(' ');
    let word = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let response = match (word, args.as_slice()) {
        ("RESERVED", [id, bytes]) => Response::Reserved {
            id: id.parse().map_err(|_| unexpected())?,
            bytes: bytes.parse().map_err(|_| unexpected())?,
        },
        ("INSERTED", [id]) => Response::Inserted(id.parse().map_err(|_| unexpected())?),
        ("BURIED", [id]) => Response::BuriedJob(id.parse().map_err(|_| unexpected())?),
        ("WATCHING", [count]) => Response::Watching(count.parse().map_err(|_| unexpected())?),
        ("USING", [tube]) => Response::Using((*tube).to_string()),
        ("DELETED", []) => Response::Deleted,
        ("RELEASED", []) => Response::Released,
        ("BURIED", []) => Response::Buried,
        ("TIMED_OUT", []) => Response::TimedOut,
        ("DEADLINE_SOON", []) => Response::DeadlineSoon,
        ("NOT_FOUND", []) => Response::NotFound,
        ("NOT_IGNORED", []) => Response::NotIgnored,
        ("EXPECTED_CRLF", []) => Response::ExpectedCrlf,
        ("JOB_TOO_BIG", []) => Response::JobTooBig,
        ("DRAINING", []) => Response::Draining,
        ("OUT_OF_MEMORY", []) => Response::OutOfMemory,
        ("INTERNAL_ERROR", []) => Response::InternalError,
        ("BAD_FORMAT", []) => Response::BadFormat,
        ("UNKNOWN_COMMAND", []) => Response::UnknownCommand,
        _ => return Err(unexpected()),
    };
    Ok(response)
}

/// Read one CRLF-terminated line. EOF before a full line is an error.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let n = reader.take(MAX_LINE_BYTES).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    if !buf.ends_with(CRLF) {
        if n as u64 >= MAX_LINE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Response line too long: more than {} bytes", MAX_LINE_BYTES),
            ));
        }
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    buf.truncate(buf.len() - CRLF.len());
    String::from_utf8(buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Read a job body of `len` bytes followed by CRLF.
pub async fn read_body<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> std::io::Result<Bytes> {
    let mut buf = vec![0u8; len + CRLF.len()];
    reader.read_exact(&mut buf).await?;
    if !buf.ends_with(CRLF) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Job body not terminated by CRLF",
        ));
    }
    buf.truncate(len);
    Ok(Bytes::from(buf))
}

/// Consume a job body of `len` bytes and its CRLF without buffering it.
pub async fn skip_body<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> std::io::Result<()> {
    let expected = len as u64 + CRLF.len() as u64;
    let copied = tokio::io::copy(&mut reader.take(expected), &mut tokio::io::sink()).await?;
    if copied != expected {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

/// Write one command line, and its body if the command carries one.
pub async fn write_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
    body: Option<&[u8]>,
) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(line.len() + 2 + body.map_or(0, |b| b.len() + 2));
    frame.extend_from_slice(line.as_bytes());
    frame.extend_from_slice(CRLF);
    if let Some(body) = body {
        frame.extend_from_slice(body);
        frame.extend_from_slice(CRLF);
    }
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
