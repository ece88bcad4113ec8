// ============================================
// File: crates/veilink-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec
//!
//! ## Creation Reason
//! Provides binary serialization and deserialization for command socket
//! frames, plus async helpers that read/write whole frames on a
//! connection.
//!
//! ## Main Functionality
//! - `ProtocolCodec`: encode/decode for every frame type
//! - Async frame I/O used by both the command server and client
//!
//! ## Wire Format
//! All multi-byte integers are little-endian.
//!
//! ## Parsing Strategy
//! 1. Check minimum frame length
//! 2. Read fixed header fields
//! 3. Validate declared payload length against the frame limit
//! 4. Validate UTF-8 for textual payloads
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always validate buffer lengths before reading
//! - Text payloads are truncated at a char boundary on encode, never
//!   rejected; oversized *incoming* frames are rejected

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use veilink_common::types::{LogRecord, Severity};

use crate::error::{CoreError, Result};
use crate::protocol::messages::{
    ServiceStatus, SystemProxyStatus, STATUS_FRAME_SIZE, SYSTEM_PROXY_FRAME_SIZE,
};
use crate::protocol::CommandCode;

// ============================================
// Constants
// ============================================

/// Maximum accepted payload of a textual frame (log record or error
/// message). Larger outgoing text is truncated; larger incoming frames
/// are rejected.
pub const MAX_TEXT_FRAME: usize = 8192;

/// Size of the log record frame header (severity + length).
const LOG_HEADER_SIZE: usize = 3;

// ============================================
// ProtocolCodec
// ============================================

/// Codec for all command socket frames.
#[derive(Debug, Default, Clone)]
pub struct ProtocolCodec;

impl ProtocolCodec {
    // ========================================
    // Log Record Frames
    // ========================================

    /// Encodes a log record frame: `[severity u8][len u16][utf-8]`.
    ///
    /// Messages longer than [`MAX_TEXT_FRAME`] bytes are truncated at a
    /// char boundary.
    pub fn encode_log_record(record: &LogRecord, buf: &mut BytesMut) {
        let text = truncate_text(&record.message);
        buf.reserve(LOG_HEADER_SIZE + text.len());
        buf.put_u8(record.severity.as_byte());
        buf.put_u16_le(text.len() as u16);
        buf.put_slice(text.as_bytes());
    }

    /// Decodes a log record frame.
    ///
    /// # Errors
    /// - [`CoreError::TooShort`] if the buffer ends mid-frame
    /// - [`CoreError::UnknownSeverity`] for an undefined severity byte
    /// - [`CoreError::InvalidUtf8`] for malformed text
    pub fn decode_log_record(buf: &mut Bytes) -> Result<LogRecord> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(CoreError::too_short(LOG_HEADER_SIZE, buf.len()));
        }
        let severity_byte = buf.get_u8();
        let severity =
            Severity::from_byte(severity_byte).ok_or(CoreError::UnknownSeverity(severity_byte))?;
        let len = buf.get_u16_le() as usize;
        if len > MAX_TEXT_FRAME {
            return Err(CoreError::FrameTooLarge {
                len,
                max: MAX_TEXT_FRAME,
            });
        }
        if buf.len() < len {
            return Err(CoreError::too_short(len, buf.len()));
        }
        let text = buf.split_to(len);
        let message = std::str::from_utf8(&text)
            .map_err(|_| CoreError::InvalidUtf8)?
            .to_owned();
        Ok(LogRecord { severity, message })
    }

    // ========================================
    // Result Frames
    // ========================================

    /// Encodes a result frame: `[0]` on success, `[1][len u16][message]`
    /// on failure.
    pub fn encode_result(result: &std::result::Result<(), String>, buf: &mut BytesMut) {
        match result {
            Ok(()) => buf.put_u8(0),
            Err(message) => {
                let text = truncate_text(message);
                buf.reserve(3 + text.len());
                buf.put_u8(1);
                buf.put_u16_le(text.len() as u16);
                buf.put_slice(text.as_bytes());
            }
        }
    }

    /// Decodes a result frame.
    ///
    /// # Errors
    /// Returns a protocol error for truncated or malformed frames.
    pub fn decode_result(buf: &mut Bytes) -> Result<std::result::Result<(), String>> {
        if buf.is_empty() {
            return Err(CoreError::too_short(1, 0));
        }
        match buf.get_u8() {
            0 => Ok(Ok(())),
            _ => {
                if buf.len() < 2 {
                    return Err(CoreError::too_short(2, buf.len()));
                }
                let len = buf.get_u16_le() as usize;
                if len > MAX_TEXT_FRAME {
                    return Err(CoreError::FrameTooLarge {
                        len,
                        max: MAX_TEXT_FRAME,
                    });
                }
                if buf.len() < len {
                    return Err(CoreError::too_short(len, buf.len()));
                }
                let text = buf.split_to(len);
                let message = std::str::from_utf8(&text)
                    .map_err(|_| CoreError::InvalidUtf8)?
                    .to_owned();
                Ok(Err(message))
            }
        }
    }

    // ========================================
    // Status Frames
    // ========================================

    /// Encodes a service status snapshot.
    pub fn encode_status(status: &ServiceStatus, buf: &mut BytesMut) {
        buf.reserve(STATUS_FRAME_SIZE);
        buf.put_u8(u8::from(status.running));
        buf.put_u32_le(status.active_flows);
        buf.put_u64_le(status.uplink_bytes);
        buf.put_u64_le(status.downlink_bytes);
        buf.put_u64_le(status.uptime_secs);
    }

    /// Decodes a service status snapshot.
    ///
    /// # Errors
    /// Returns [`CoreError::TooShort`] for truncated frames.
    pub fn decode_status(buf: &mut Bytes) -> Result<ServiceStatus> {
        if buf.len() < STATUS_FRAME_SIZE {
            return Err(CoreError::too_short(STATUS_FRAME_SIZE, buf.len()));
        }
        Ok(ServiceStatus {
            running: buf.get_u8() != 0,
            active_flows: buf.get_u32_le(),
            uplink_bytes: buf.get_u64_le(),
            downlink_bytes: buf.get_u64_le(),
            uptime_secs: buf.get_u64_le(),
        })
    }

    /// Encodes a system-proxy status frame.
    pub fn encode_system_proxy_status(status: &SystemProxyStatus, buf: &mut BytesMut) {
        buf.reserve(SYSTEM_PROXY_FRAME_SIZE);
        buf.put_u8(u8::from(status.available));
        buf.put_u8(u8::from(status.enabled));
    }

    /// Decodes a system-proxy status frame.
    ///
    /// # Errors
    /// Returns [`CoreError::TooShort`] for truncated frames.
    pub fn decode_system_proxy_status(buf: &mut Bytes) -> Result<SystemProxyStatus> {
        if buf.len() < SYSTEM_PROXY_FRAME_SIZE {
            return Err(CoreError::too_short(SYSTEM_PROXY_FRAME_SIZE, buf.len()));
        }
        Ok(SystemProxyStatus {
            available: buf.get_u8() != 0,
            enabled: buf.get_u8() != 0,
        })
    }

    // ========================================
    // Async Frame I/O
    // ========================================

    /// Writes the initial command byte of a connection.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub async fn write_command<W>(writer: &mut W, command: CommandCode) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&[command.as_byte()])
            .await
            .map_err(|e| CoreError::io("write command", e))
    }

    /// Reads and validates the initial command byte of a connection.
    ///
    /// # Errors
    /// - I/O error if the read fails
    /// - [`CoreError::UnknownCommand`] for undefined bytes
    pub async fn read_command<R>(reader: &mut R) -> Result<CommandCode>
    where
        R: AsyncRead + Unpin,
    {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .await
            .map_err(|e| CoreError::io("read command", e))?;
        CommandCode::from_byte(byte[0])
    }

    /// Writes one boolean request octet.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub async fn write_bool<W>(writer: &mut W, value: bool) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&[u8::from(value)])
            .await
            .map_err(|e| CoreError::io("write flag", e))
    }

    /// Reads one boolean request octet.
    ///
    /// # Errors
    /// Returns an I/O error if the read fails.
    pub async fn read_bool<R>(reader: &mut R) -> Result<bool>
    where
        R: AsyncRead + Unpin,
    {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .await
            .map_err(|e| CoreError::io("read flag", e))?;
        Ok(byte[0] != 0)
    }

    /// Writes a complete log record frame.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub async fn write_log_record<W>(writer: &mut W, record: &LogRecord) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::new();
        Self::encode_log_record(record, &mut buf);
        writer
            .write_all(&buf)
            .await
            .map_err(|e| CoreError::io("write log record", e))
    }

    /// Reads a complete log record frame.
    ///
    /// # Errors
    /// - I/O error if the underlying reads fail (including EOF)
    /// - Protocol errors for malformed frames
    pub async fn read_log_record<R>(reader: &mut R) -> Result<LogRecord>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; LOG_HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .await
            .map_err(|e| CoreError::io("read log header", e))?;
        let severity =
            Severity::from_byte(header[0]).ok_or(CoreError::UnknownSeverity(header[0]))?;
        let len = u16::from_le_bytes([header[1], header[2]]) as usize;
        if len > MAX_TEXT_FRAME {
            return Err(CoreError::FrameTooLarge {
                len,
                max: MAX_TEXT_FRAME,
            });
        }
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| CoreError::io("read log payload", e))?;
        let message = String::from_utf8(payload).map_err(|_| CoreError::InvalidUtf8)?;
        Ok(LogRecord { severity, message })
    }

    /// Writes a complete result frame.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub async fn write_result<W>(
        writer: &mut W,
        result: &std::result::Result<(), String>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::new();
        Self::encode_result(result, &mut buf);
        writer
            .write_all(&buf)
            .await
            .map_err(|e| CoreError::io("write result", e))
    }

    /// Reads a complete result frame.
    ///
    /// # Errors
    /// - I/O error if the underlying reads fail
    /// - Protocol errors for malformed frames
    pub async fn read_result<R>(reader: &mut R) -> Result<std::result::Result<(), String>>
    where
        R: AsyncRead + Unpin,
    {
        let mut code = [0u8; 1];
        reader
            .read_exact(&mut code)
            .await
            .map_err(|e| CoreError::io("read result", e))?;
        if code[0] == 0 {
            return Ok(Ok(()));
        }
        let mut len_bytes = [0u8; 2];
        reader
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| CoreError::io("read result message length", e))?;
        let len = u16::from_le_bytes(len_bytes) as usize;
        if len > MAX_TEXT_FRAME {
            return Err(CoreError::FrameTooLarge {
                len,
                max: MAX_TEXT_FRAME,
            });
        }
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| CoreError::io("read result message", e))?;
        let message = String::from_utf8(payload).map_err(|_| CoreError::InvalidUtf8)?;
        Ok(Err(message))
    }

    /// Writes a complete status frame.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub async fn write_status<W>(writer: &mut W, status: &ServiceStatus) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::new();
        Self::encode_status(status, &mut buf);
        writer
            .write_all(&buf)
            .await
            .map_err(|e| CoreError::io("write status", e))
    }

    /// Reads a complete status frame.
    ///
    /// # Errors
    /// Returns an I/O error or [`CoreError::TooShort`].
    pub async fn read_status<R>(reader: &mut R) -> Result<ServiceStatus>
    where
        R: AsyncRead + Unpin,
    {
        let mut payload = [0u8; STATUS_FRAME_SIZE];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| CoreError::io("read status", e))?;
        let mut bytes = Bytes::copy_from_slice(&payload);
        Self::decode_status(&mut bytes)
    }

    /// Writes a complete system-proxy status frame.
    ///
    /// # Errors
    /// Returns an I/O error if the write fails.
    pub async fn write_system_proxy_status<W>(
        writer: &mut W,
        status: &SystemProxyStatus,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::new();
        Self::encode_system_proxy_status(status, &mut buf);
        writer
            .write_all(&buf)
            .await
            .map_err(|e| CoreError::io("write system-proxy status", e))
    }

    /// Reads a complete system-proxy status frame.
    ///
    /// # Errors
    /// Returns an I/O error or [`CoreError::TooShort`].
    pub async fn read_system_proxy_status<R>(reader: &mut R) -> Result<SystemProxyStatus>
    where
        R: AsyncRead + Unpin,
    {
        let mut payload = [0u8; SYSTEM_PROXY_FRAME_SIZE];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| CoreError::io("read system-proxy status", e))?;
        let mut bytes = Bytes::copy_from_slice(&payload);
        Self::decode_system_proxy_status(&mut bytes)
    }
}

/// Truncates text to [`MAX_TEXT_FRAME`] bytes at a char boundary.
fn truncate_text(text: &str) -> &str {
    if text.len() <= MAX_TEXT_FRAME {
        return text;
    }
    let mut end = MAX_TEXT_FRAME;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_known_vector() {
        let record = LogRecord::new(Severity::Warning, "hi");
        let mut buf = BytesMut::new();
        ProtocolCodec::encode_log_record(&record, &mut buf);
        assert_eq!(&buf[..], &[2, 2, 0, b'h', b'i']);

        let mut bytes = buf.freeze();
        let decoded = ProtocolCodec::decode_log_record(&mut bytes).unwrap();
        assert_eq!(decoded, record);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_log_record_truncated_frame() {
        let mut bytes = Bytes::from_static(&[1, 5, 0, b'a']);
        assert!(matches!(
            ProtocolCodec::decode_log_record(&mut bytes),
            Err(CoreError::TooShort { expected: 5, .. })
        ));
    }

    #[test]
    fn test_log_record_unknown_severity() {
        let mut bytes = Bytes::from_static(&[9, 0, 0]);
        assert!(matches!(
            ProtocolCodec::decode_log_record(&mut bytes),
            Err(CoreError::UnknownSeverity(9))
        ));
    }

    #[test]
    fn test_log_record_invalid_utf8() {
        let mut bytes = Bytes::from_static(&[1, 2, 0, 0xff, 0xfe]);
        assert!(matches!(
            ProtocolCodec::decode_log_record(&mut bytes),
            Err(CoreError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_oversized_message_truncated_on_encode() {
        let record = LogRecord::new(Severity::Info, "x".repeat(MAX_TEXT_FRAME + 100));
        let mut buf = BytesMut::new();
        ProtocolCodec::encode_log_record(&record, &mut buf);
        assert_eq!(buf.len(), LOG_HEADER_SIZE + MAX_TEXT_FRAME);

        let decoded = ProtocolCodec::decode_log_record(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.message.len(), MAX_TEXT_FRAME);
    }

    #[test]
    fn test_result_frames() {
        let mut buf = BytesMut::new();
        ProtocolCodec::encode_result(&Ok(()), &mut buf);
        assert_eq!(&buf[..], &[0]);
        assert_eq!(
            ProtocolCodec::decode_result(&mut buf.freeze()).unwrap(),
            Ok(())
        );

        let mut buf = BytesMut::new();
        ProtocolCodec::encode_result(&Err("x".to_owned()), &mut buf);
        assert_eq!(&buf[..], &[1, 1, 0, b'x']);
        assert_eq!(
            ProtocolCodec::decode_result(&mut buf.freeze()).unwrap(),
            Err("x".to_owned())
        );
    }

    #[test]
    fn test_status_known_vector() {
        let status = ServiceStatus {
            running: true,
            active_flows: 2,
            uplink_bytes: 0x0102,
            downlink_bytes: 3,
            uptime_secs: 60,
        };
        let mut buf = BytesMut::new();
        ProtocolCodec::encode_status(&status, &mut buf);
        assert_eq!(buf.len(), STATUS_FRAME_SIZE);
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..5], &[2, 0, 0, 0]);
        assert_eq!(&buf[5..7], &[0x02, 0x01]);

        let decoded = ProtocolCodec::decode_status(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_system_proxy_status_vector() {
        let status = SystemProxyStatus {
            available: true,
            enabled: false,
        };
        let mut buf = BytesMut::new();
        ProtocolCodec::encode_system_proxy_status(&status, &mut buf);
        assert_eq!(&buf[..], &[1, 0]);
    }

    #[tokio::test]
    async fn test_async_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(256);

        ProtocolCodec::write_command(&mut client, CommandCode::Status)
            .await
            .unwrap();
        let command = ProtocolCodec::read_command(&mut server).await.unwrap();
        assert_eq!(command, CommandCode::Status);

        let record = LogRecord::new(Severity::Error, "dispatch failed");
        ProtocolCodec::write_log_record(&mut server, &record)
            .await
            .unwrap();
        let received = ProtocolCodec::read_log_record(&mut client).await.unwrap();
        assert_eq!(received, record);
    }

    #[tokio::test]
    async fn test_async_unknown_command() {
        let (mut client, mut server) = tokio::io::duplex(16);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0x42])
            .await
            .unwrap();
        assert!(matches!(
            ProtocolCodec::read_command(&mut server).await,
            Err(CoreError::UnknownCommand(0x42))
        ));
    }
}
