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

use vhook_common::Reply;

/// Writing half of the session.
pub struct Sink<W: tokio::io::AsyncWrite + Unpin + Send> {
    pub(crate) inner: W,
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> Sink<W> {
    ///
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one folded reply to the client.
    pub async fn send_reply(&mut self, reply: &Reply) -> std::io::Result<()> {
        let folded = reply.fold();
        tracing::trace!(">> {:?}", folded);

        tokio::io::AsyncWriteExt::write_all(&mut self.inner, folded.as_bytes()).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await
    }
}
