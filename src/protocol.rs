//! The replica stream wire protocol.
//!
//! The primary's HTTP stream endpoint is out of scope for this crate (see
//! the spec's Non-goals), but the framing it produces is not: the core must
//! decode it to drive [`crate::store::Store`]'s replica-stream consumption,
//! and tests need to produce it to exercise that path end to end.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::pos::LtxHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Ltx = 1,
    Ready = 2,
    End = 3,
    DropDb = 4,
}

impl FrameTag {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(FrameTag::Ltx),
            2 => Ok(FrameTag::Ready),
            3 => Ok(FrameTag::End),
            4 => Ok(FrameTag::DropDb),
            other => Err(Error::UnknownFrameTag(other)),
        }
    }
}

/// Decodes an LTX file's bytes into its header. The codec itself (varint
/// layout, page data, trailing checksum) is out of scope; this crate only
/// needs the handful of header fields it enforces invariants on.
pub trait LtxCodec: Send + Sync {
    fn decode_header(&self, bytes: &[u8]) -> Result<LtxHeader>;
}

/// Reads the next frame tag from the stream. `Ok(None)` means the stream
/// ended cleanly (an explicit `End` frame); `Err(Error::StreamClosed)` means
/// the underlying transport was closed before a tag byte could be read,
/// which is treated identically to a disconnect by the caller.
pub async fn read_frame_tag<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<FrameTag>> {
    let mut tag = [0u8; 1];
    match r.read_exact(&mut tag).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(Error::StreamClosed),
        Err(e) => return Err(e.into()),
    }
    match FrameTag::from_u8(tag[0])? {
        FrameTag::End => Ok(None),
        other => Ok(Some(other)),
    }
}

/// Consumes the chunked LTX body from `r`, reassembling the full file bytes.
/// A zero-length chunk terminates the body. The caller hands the result to
/// an [`LtxCodec`] to recover the header, then to [`crate::db::Db`] to
/// install it on disk with the atomic write-rename-fsync pattern.
pub async fn read_ltx_body<R>(r: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut all = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 {
            break;
        }
        let mut chunk = vec![0u8; len];
        r.read_exact(&mut chunk).await?;
        all.extend_from_slice(&chunk);
    }
    Ok(all)
}

/// Reads the length-prefixed UTF-8 database name carried by a `DropDb`
/// frame.
pub async fn read_drop_db_name<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| Error::Internal(format!("invalid DropDb name: {e}")))
}

/// Writer-side helpers. Used by test fixtures that stand in for the (out of
/// scope) primary stream endpoint.
pub mod encode {
    use super::*;

    pub async fn write_ltx_frame<W: AsyncWrite + Unpin>(w: &mut W, body: &[u8]) -> Result<()> {
        w.write_all(&[FrameTag::Ltx as u8]).await?;
        for chunk in body.chunks(4096) {
            w.write_all(&(chunk.len() as u32).to_le_bytes()).await?;
            w.write_all(chunk).await?;
        }
        w.write_all(&0u32.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn write_ready_frame<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
        w.write_all(&[FrameTag::Ready as u8]).await?;
        Ok(())
    }

    pub async fn write_end_frame<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
        w.write_all(&[FrameTag::End as u8]).await?;
        Ok(())
    }

    pub async fn write_drop_db_frame<W: AsyncWrite + Unpin>(w: &mut W, name: &str) -> Result<()> {
        w.write_all(&[FrameTag::DropDb as u8]).await?;
        w.write_all(&(name.len() as u32).to_le_bytes()).await?;
        w.write_all(name.as_bytes()).await?;
        Ok(())
    }
}
