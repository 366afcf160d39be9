/*
 * vHook SMTP to webhook relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::command::{Command, UnparsedArgs, Verb};
use tokio::io::AsyncReadExt;

fn find(bytes: &[u8], search: &[u8]) -> Option<usize> {
    bytes
        .windows(search.len())
        .position(|window| window == search)
}

/// Reading half of the session.
pub struct Stream<R: tokio::io::AsyncRead + Unpin + Send> {
    pub(crate) inner: R,
    initial_capacity: usize,
    additional_reserve: usize,
}

/// Error while processing the TCP/IP stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The buffer is longer than expected.
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// Maximum size expected.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// Other IO error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Stream<R> {
    ///
    #[must_use]
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            initial_capacity: 80,
            additional_reserve: 100,
        }
    }

    fn as_line_stream(
        &mut self,
    ) -> impl tokio_stream::Stream<Item = std::io::Result<Vec<u8>>> + '_ {
        async_stream::try_stream! {
            let mut buffer = bytes::BytesMut::with_capacity(self.initial_capacity);
            let mut n = 0;

            loop {
                if let Some(pos) = find(&buffer[..n], b"\r\n") {
                    let out = buffer.split_to(pos + 2);
                    n -= out.len();

                    yield Vec::<u8>::from(out);
                } else {
                    buffer.reserve(self.additional_reserve);
                    let read_size = self.inner.read_buf(&mut buffer).await?;
                    if read_size == 0 {
                        return;
                    }
                    n += read_size;
                }
            }
        }
    }

    /// The message body sent between `DATA` and `.<CRLF>`, line by line,
    /// dot-stuffing removed, total size capped at `size_limit`.
    pub fn as_message_stream(
        &mut self,
        size_limit: usize,
    ) -> impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + '_ {
        async_stream::stream! {
            let mut size = 0;

            for await line in self.as_line_stream() {
                let mut line = line?;

                if line == b".\r\n" {
                    return;
                }

                if line.first() == Some(&b'.') {
                    line = line[1..].to_vec();
                }

                size += line.len();
                if size >= size_limit {
                    yield Err(Error::BufferTooLong { expected: size_limit, got: size });
                    return;
                }

                yield Ok(line);
            }
        }
    }

    /// One SMTP command per item, the verb recognized case-insensitively.
    pub fn as_command_stream(
        &mut self,
    ) -> impl tokio_stream::Stream<Item = Result<Command<Verb, UnparsedArgs>, Error>> + '_ {
        async_stream::stream! {
            for await line in self.as_line_stream() {
                let line = line?;

                // RFC5321#4.5.3.1.4
                if line.len() >= 512 {
                    yield Err(Error::BufferTooLong { expected: 512, got: line.len() });
                    return;
                }

                yield Ok(<Verb as strum::VariantNames>::VARIANTS.iter().find(|i| {
                    line.len() >= i.len() && line[..i.len()].eq_ignore_ascii_case(i.as_bytes())
                }).map_or_else(
                    || (Verb::Unknown, UnparsedArgs(line.clone())),
                    |verb| { (
                        verb.parse().expect("verb found above"),
                        UnparsedArgs(line[verb.len()..].to_vec()),
                    ) },
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    async fn commands(input: &str) -> Vec<(Verb, Vec<u8>)> {
        let mut stream = Stream::new(input.as_bytes());
        let command_stream = stream.as_command_stream();
        tokio::pin!(command_stream);

        let mut out = vec![];
        while let Some(item) = command_stream.next().await {
            let (verb, args) = item.unwrap();
            out.push((verb, args.0));
        }
        out
    }

    #[tokio::test]
    async fn tokenize() {
        let out = commands("EHLO client.example.com\r\nMAIL FROM:<a@b>\r\nQUIT\r\n").await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].0, Verb::Ehlo);
        assert_eq!(out[0].1, b"client.example.com\r\n");
        assert_eq!(out[1].0, Verb::MailFrom);
        assert_eq!(out[1].1, b"<a@b>\r\n");
        assert_eq!(out[2].0, Verb::Quit);
    }

    #[tokio::test]
    async fn verbs_are_case_insensitive() {
        let out = commands("ehlo client.example.com\r\nnoop\r\n").await;
        assert_eq!(out[0].0, Verb::Ehlo);
        assert_eq!(out[1].0, Verb::Noop);
    }

    #[tokio::test]
    async fn unknown_command() {
        let out = commands("XFROB me\r\n").await;
        assert_eq!(out[0].0, Verb::Unknown);
        assert_eq!(out[0].1, b"XFROB me\r\n");
    }

    #[tokio::test]
    async fn message_stream_removes_dot_stuffing() {
        let input = "line one\r\n..starts with a dot\r\n.\r\n";
        let mut stream = Stream::new(input.as_bytes());
        let message_stream = stream.as_message_stream(1024);
        tokio::pin!(message_stream);

        let mut out = vec![];
        while let Some(chunk) = message_stream.next().await {
            out.push(String::from_utf8(chunk.unwrap()).unwrap());
        }

        pretty_assertions::assert_eq!(out, ["line one\r\n", ".starts with a dot\r\n"]);
    }

    #[tokio::test]
    async fn message_stream_enforces_the_size_limit() {
        let input = format!("{}\r\n.\r\n", "x".repeat(64));
        let mut stream = Stream::new(input.as_bytes());
        let message_stream = stream.as_message_stream(32);
        tokio::pin!(message_stream);

        assert!(matches!(
            message_stream.next().await,
            Some(Err(Error::BufferTooLong { expected: 32, .. }))
        ));
    }
}
