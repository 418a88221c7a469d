//! Newline-delimited text over a byte stream.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::menu;

/// Longest accepted input line, newline included.
pub const MAX_LINE_LEN: usize = 4096;

/// Outbound half of a connection, shared between the session and its chat
/// poller. Every write takes the lock for the whole text, so lines from the
/// two writers never interleave.
pub struct LineWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for LineWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write `text` as-is and flush. Prompts omit the trailing newline.
    pub async fn write(&self, text: &str) -> std::io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await
    }

    /// Write several lines under one lock acquisition.
    pub async fn write_lines<I, S>(&self, lines: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut writer = self.inner.lock().await;
        for line in lines {
            writer.write_all(line.as_ref().as_bytes()).await?;
        }
        writer.flush().await
    }

    pub async fn shutdown(&self) -> std::io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

/// One client connection: a buffered reader plus the shared writer.
pub struct LineChannel<R, W> {
    reader: R,
    writer: LineWriter<W>,
    buf: Vec<u8>,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer: LineWriter::new(writer),
            buf: Vec::with_capacity(256),
        }
    }

    pub fn writer(&self) -> &LineWriter<W> {
        &self.writer
    }

    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        Ok(self.writer.write(text).await?)
    }

    /// Read one line without its line terminator.
    ///
    /// End of stream is `Closed`. Bytes that are not UTF-8 are replaced, so
    /// they reach the caller as (invalid) input rather than a transport error.
    pub async fn read_line(&mut self) -> Result<String, SessionError> {
        self.buf.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if n == 0 {
            return Err(SessionError::Closed);
        }
        if n == MAX_LINE_LEN && self.buf.last() != Some(&b'\n') {
            return Err(SessionError::LineTooLong(MAX_LINE_LEN));
        }

        let line = String::from_utf8_lossy(&self.buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send a prompt and read the trimmed answer. Blank answers are allowed.
    pub async fn prompt(&mut self, prompt: &str) -> Result<String, SessionError> {
        self.send(prompt).await?;
        Ok(self.read_line().await?.trim().to_string())
    }

    /// Like [`prompt`](Self::prompt) but re-asks until the answer is not blank.
    pub async fn prompt_required(&mut self, prompt: &str) -> Result<String, SessionError> {
        loop {
            let answer = self.prompt(prompt).await?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            self.send(menu::EMPTY_INPUT).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, BufReader};

    use super::*;

    fn channel(input: &[u8]) -> LineChannel<BufReader<&[u8]>, Vec<u8>> {
        LineChannel::new(BufReader::new(input), Vec::new())
    }

    #[tokio::test]
    async fn strips_line_terminators() {
        let mut ch = channel(b"hello\r\nworld\nlast");
        assert_eq!(ch.read_line().await.unwrap(), "hello");
        assert_eq!(ch.read_line().await.unwrap(), "world");
        assert_eq!(ch.read_line().await.unwrap(), "last");
        assert!(matches!(ch.read_line().await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn prompt_required_skips_blank_answers() {
        let mut ch = channel(b"\n   \nAda\n");
        assert_eq!(ch.prompt_required("Name: ").await.unwrap(), "Ada");
    }

    #[tokio::test]
    async fn overlong_line_is_rejected() {
        let input = vec![b'x'; MAX_LINE_LEN + 10];
        let mut ch = channel(&input);
        assert!(matches!(
            ch.read_line().await,
            Err(SessionError::LineTooLong(_))
        ));
    }

    #[tokio::test]
    async fn writer_clones_share_one_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let writer = LineWriter::new(server);
        let other = writer.clone();

        writer.write("one\n").await.unwrap();
        other.write_lines(["two\n", "three\n"]).await.unwrap();
        writer.shutdown().await.unwrap();
        drop((writer, other));

        let mut out = String::new();
        let mut client = client;
        client.shutdown().await.unwrap();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "one\ntwo\nthree\n");
    }
}
