//! Frame codec: the primitive wire fields and reliable stream I/O.
//!
//! Every field is fixed width and little-endian:
//! - name length: 2 bytes, signed
//! - size / count: 4 bytes, signed (`-1` = not found)
//! - elapsed time: 4 bytes, IEEE-754 single precision
//!
//! A single `read` on a stream socket may return fewer bytes than asked for,
//! so every fixed-length read goes through [`read_exact`], which keeps reading
//! until satisfied and treats a zero-length read as the peer closing.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{width, SYNC_ACK};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read exactly `n` bytes, accumulating across short reads.
pub async fn read_exact<R>(reader: &mut R, n: usize) -> ProtocolResult<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; n];
    fill(reader, &mut buf).await?;
    Ok(buf)
}

/// Fill `buf` completely or fail with `ShortRead`.
pub async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortRead {
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Write the whole buffer and flush it onto the wire.
pub async fn write_all<W>(writer: &mut W, bytes: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub fn encode_name_len(n: usize) -> ProtocolResult<[u8; 2]> {
    let v = i16::try_from(n).map_err(|_| ProtocolError::FrameRange {
        field: "name length",
        value: n as i64,
    })?;
    Ok(v.to_le_bytes())
}

pub fn decode_name_len(bytes: [u8; 2]) -> ProtocolResult<usize> {
    let v = i16::from_le_bytes(bytes);
    if v < 0 {
        return Err(ProtocolError::Desync(format!("negative name length {}", v)));
    }
    Ok(v as usize)
}

pub fn encode_size(n: i64) -> ProtocolResult<[u8; 4]> {
    let v = i32::try_from(n).map_err(|_| ProtocolError::FrameRange {
        field: "size",
        value: n,
    })?;
    Ok(v.to_le_bytes())
}

pub fn decode_size(bytes: [u8; 4]) -> i64 {
    i32::from_le_bytes(bytes) as i64
}

pub fn encode_f32(x: f32) -> [u8; 4] {
    x.to_le_bytes()
}

pub fn decode_f32(bytes: [u8; 4]) -> f32 {
    f32::from_le_bytes(bytes)
}

/// Largest size the size frame can carry
pub const MAX_WIRE_SIZE: u64 = i32::MAX as u64;

pub async fn write_size<W>(writer: &mut W, n: i64) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_all(writer, &encode_size(n)?).await
}

pub async fn read_size<R>(reader: &mut R) -> ProtocolResult<i64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut b = [0u8; width::SIZE];
    fill(reader, &mut b).await?;
    Ok(decode_size(b))
}

pub async fn write_elapsed<W>(writer: &mut W, secs: f32) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_all(writer, &encode_f32(secs)).await
}

pub async fn read_elapsed<R>(reader: &mut R) -> ProtocolResult<f32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut b = [0u8; width::ELAPSED];
    fill(reader, &mut b).await?;
    Ok(decode_f32(b))
}

/// Name frame: 2-byte length followed by the raw UTF-8 bytes.
/// Length and bytes go out in one write.
pub async fn write_name<W>(writer: &mut W, name: &str) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = encode_name_len(name.len())?;
    let mut out = Vec::with_capacity(width::NAME_LEN + name.len());
    out.extend_from_slice(&len);
    out.extend_from_slice(name.as_bytes());
    write_all(writer, &out).await
}

pub async fn read_name<R>(reader: &mut R) -> ProtocolResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_name_or_eof(reader)
        .await?
        .ok_or(ProtocolError::ShortRead {
            expected: width::NAME_LEN,
            received: 0,
        })
}

/// Like [`read_name`], but a stream that ends cleanly before the first byte
/// yields `None` instead of an error.
async fn read_name_or_eof<R>(reader: &mut R) -> ProtocolResult<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len = [0u8; width::NAME_LEN];
    let first = reader.read(&mut len).await?;
    if first == 0 {
        return Ok(None);
    }
    fill(reader, &mut len[first..]).await.map_err(|e| match e {
        ProtocolError::ShortRead { received, .. } => ProtocolError::ShortRead {
            expected: width::NAME_LEN,
            received: first + received,
        },
        other => other,
    })?;
    let n = decode_name_len(len)?;
    let raw = read_exact(reader, n).await?;
    let name = String::from_utf8(raw)
        .map_err(|_| ProtocolError::Desync("name is not valid UTF-8".into()))?;
    Ok(Some(name))
}

/// Command tokens are framed exactly like names.
pub async fn write_command<W>(writer: &mut W, token: &str) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_name(writer, token).await
}

/// Next command token, or `None` when the peer hung up between commands.
pub async fn read_command<R>(reader: &mut R) -> ProtocolResult<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_name_or_eof(reader).await
}

pub async fn send_ack<W>(writer: &mut W) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_all(writer, &[SYNC_ACK]).await
}

pub async fn expect_ack<R>(reader: &mut R) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let b = read_byte(reader).await?;
    if b != SYNC_ACK {
        return Err(ProtocolError::Desync(format!(
            "expected sync ack, got byte 0x{:02x}",
            b
        )));
    }
    Ok(())
}

pub async fn read_byte<R>(reader: &mut R) -> ProtocolResult<u8>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut b = [0u8; 1];
    fill(reader, &mut b).await?;
    Ok(b[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_exact_accumulates_short_reads() {
        let mut mock = Builder::new()
            .read(&[1])
            .read(&[2, 3])
            .read(&[4, 5, 6])
            .build();
        let got = read_exact(&mut mock, 6).await.unwrap();
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_read_exact_reports_short_read() {
        let mut mock = Builder::new().read(&[9, 9, 9]).build();
        match read_exact(&mut mock, 4).await {
            Err(ProtocolError::ShortRead { expected, received }) => {
                assert_eq!(expected, 4);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_name_len_bounds() {
        assert_eq!(encode_name_len(5).unwrap(), [5, 0]);
        assert_eq!(decode_name_len([0x34, 0x12]).unwrap(), 0x1234);
        assert!(encode_name_len(i16::MAX as usize).is_ok());
        assert!(encode_name_len(i16::MAX as usize + 1).is_err());
        // -1 as i16
        assert!(matches!(
            decode_name_len([0xff, 0xff]),
            Err(ProtocolError::Desync(_))
        ));
    }

    #[test]
    fn test_size_frame() {
        assert_eq!(encode_size(-1).unwrap(), [0xff; 4]);
        assert_eq!(decode_size([0xff; 4]), -1);
        assert_eq!(decode_size(encode_size(10_000).unwrap()), 10_000);
        assert!(encode_size(MAX_WIRE_SIZE as i64).is_ok());
        assert!(encode_size(MAX_WIRE_SIZE as i64 + 1).is_err());
        assert!(encode_size(i32::MIN as i64 - 1).is_err());
    }

    #[test]
    fn test_elapsed_frame() {
        assert_eq!(encode_f32(1.5), [0x00, 0x00, 0xc0, 0x3f]);
        assert_eq!(decode_f32(encode_f32(0.25)), 0.25);
    }

    #[tokio::test]
    async fn test_name_split_across_reads() {
        // length prefix arrives one byte at a time, then the name in two pieces
        let mut mock = Builder::new()
            .read(&[7])
            .read(&[0])
            .read(b"rep")
            .read(b"ort")
            .read(b"s")
            .build();
        assert_eq!(read_name(&mut mock).await.unwrap(), "reports");
    }

    #[tokio::test]
    async fn test_write_name_layout() {
        let mut mock = Builder::new().write(&[4, 0, b'a', b'.', b'm', b'd']).build();
        write_name(&mut mock, "a.md").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_command_clean_eof() {
        let mut mock = Builder::new().build();
        assert_eq!(read_command(&mut mock).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_command_truncated_prefix() {
        let mut mock = Builder::new().read(&[3]).build();
        assert!(matches!(
            read_command(&mut mock).await,
            Err(ProtocolError::ShortRead {
                expected: 2,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_expect_ack_rejects_other_bytes() {
        let mut ok = Builder::new().read(&[SYNC_ACK]).build();
        expect_ack(&mut ok).await.unwrap();

        let mut bad = Builder::new().read(b"N").build();
        assert!(matches!(
            expect_ack(&mut bad).await,
            Err(ProtocolError::Desync(_))
        ));
    }

    #[tokio::test]
    async fn test_size_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1);
        let writer = tokio::spawn(async move {
            write_size(&mut a, 123_456).await.unwrap();
            write_elapsed(&mut a, 2.0).await.unwrap();
        });
        assert_eq!(read_size(&mut b).await.unwrap(), 123_456);
        assert_eq!(read_elapsed(&mut b).await.unwrap(), 2.0);
        writer.await.unwrap();
    }
}
