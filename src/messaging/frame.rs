use anyhow::bail;
use bytes::{BufMut, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single frame's body. A peer announcing a longer frame is apparently
///  compromised (or speaking a different protocol), and the connection is closed.
pub const MAX_FRAME_LEN: usize = 16*1024*1024; //TODO make this configurable

/// Every message and every acknowledgment travels as one frame: a u32 length in network byte
///  order, followed by that many bytes of body.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, body: &[u8]) -> anyhow::Result<()> {
    if body.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes is longer than the maximum of {}", body.len(), MAX_FRAME_LEN);
    }

    let mut buf = BytesMut::with_capacity(body.len() + size_of::<u32>());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the next frame. Returns `None` if the peer closed the stream cleanly at a frame
///  boundary; a stream ending in the middle of a frame is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let first = match stream.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut rest = [0u8; 3];
    stream.read_exact(&mut rest).await?;
    let frame_len = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]) as usize;

    if frame_len > MAX_FRAME_LEN {
        bail!("received a frame that was longer than the maximum ({}) - closing connection because it is apparently compromised", frame_len);
    }

    let mut body = vec![0u8; frame_len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Convenience for the request / acknowledgment pattern every hop uses: send one frame, wait
///  for exactly one frame in return.
pub async fn request<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, body: &[u8]) -> anyhow::Result<Vec<u8>> {
    write_frame(stream, body).await?;
    match read_frame(stream).await? {
        Some(response) => Ok(response),
        None => bail!("connection closed by peer before a response was received"),
    }
}
