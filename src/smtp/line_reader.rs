//! Line-oriented framing over a connection stream (C1).
//!
//! Bare LF is accepted leniently as a line terminator; a bare CR (one not
//! immediately followed by LF) is rejected as malformed. Every read is
//! bounded by a caller-supplied deadline — there is no read without one.

use crate::error::{Result, SmtpError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

pub struct LineReader<S> {
    stream: S,
    buf: Vec<u8>,
    max_line_length: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> LineReader<S> {
    pub fn new(stream: S, max_line_length: usize) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(256),
            max_line_length,
        }
    }

    /// Whether a complete line is already sitting in the buffer, i.e. the
    /// next `read_line` won't need to touch the network. Used to decide
    /// whether a pipelined command group's reply can be held back.
    pub fn has_buffered_line(&self) -> bool {
        self.buf.contains(&b'\n')
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(SmtpError::from)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await.map_err(SmtpError::from)
    }

    async fn fill_buf(&mut self) -> Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(SmtpError::from)?;
        if n == 0 {
            return Err(SmtpError::ConnectionClosed);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn next_raw_line(&mut self, deadline: Duration) -> Result<Vec<u8>> {
        match timeout(deadline, async {
            loop {
                if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                    let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                    line.pop(); // trailing \n
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if line.contains(&b'\r') {
                        return Err(SmtpError::Malformed("bare CR in line".to_string()));
                    }
                    return Ok(line);
                }
                if self.buf.len() >= self.max_line_length {
                    return Err(SmtpError::LineTooLong);
                }
                self.fill_buf().await?;
            }
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SmtpError::Timeout),
        }
    }

    /// Read one command or body line, interpreted as UTF-8.
    pub async fn read_line(&mut self, deadline: Duration) -> Result<String> {
        let raw = self.next_raw_line(deadline).await?;
        String::from_utf8(raw).map_err(|e| SmtpError::Malformed(format!("invalid utf-8: {e}")))
    }

    /// Read lines in DATA mode until a bare `.` terminator, undoing
    /// dot-stuffing and enforcing `max_message_size` against the
    /// accumulated body.
    pub async fn read_body_dot(
        &mut self,
        deadline: Duration,
        max_message_size: usize,
    ) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let line = self.next_raw_line(deadline).await?;
            if line == b"." {
                break;
            }
            let content: &[u8] = if line.first() == Some(&b'.') {
                &line[1..]
            } else {
                &line[..]
            };
            if body.len() + content.len() + 2 > max_message_size {
                return Err(SmtpError::MessageTooLarge);
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        Ok(body)
    }

    /// Read exactly `n` bytes with no interpretation, for a BDAT chunk.
    pub async fn read_octets(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>> {
        match timeout(deadline, async {
            while self.buf.len() < n {
                self.fill_buf().await?;
            }
            Ok::<_, SmtpError>(self.buf.drain(..n).collect())
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SmtpError::Timeout),
        }
    }
}
