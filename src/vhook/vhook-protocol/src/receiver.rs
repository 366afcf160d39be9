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
use crate::{
    sink::Sink,
    stream::{Error, Stream},
    AcceptArgs, EhloArgs, HeloArgs, MailFromArgs, ParseArgsError, RcptToArgs, ReceiverHandler,
    Verb,
};
use tokio_stream::StreamExt;
use vhook_common::Stage;

enum HandshakeOutcome {
    Message,
    Quit,
}

/// A handle to send events from the [`ReceiverHandler`] to the [`Receiver`].
#[derive(Default)]
pub struct ReceiverContext {
    quit: bool,
}

impl ReceiverContext {
    /// Make the [`Receiver`] quit the connection early, and close cleanly.
    pub fn deny(&mut self) {
        self.quit = true;
    }
}

/// A SMTP receiver, driving one session over any duplex byte stream.
pub struct Receiver<
    T: ReceiverHandler + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
> {
    handler: T,
    sink: Sink<W>,
    stream: Stream<R>,
    context: ReceiverContext,
    command_timeout: std::time::Duration,
    message_size_max: usize,
}

impl<
        T: ReceiverHandler + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
        R: tokio::io::AsyncRead + Unpin + Send,
    > Receiver<T, W, R>
{
    /// Create a new [`Receiver`] from the two halves of a byte stream.
    pub fn new(
        read: R,
        write: W,
        handler: T,
        command_timeout: std::time::Duration,
        message_size_max: usize,
    ) -> Self {
        Self {
            handler,
            sink: Sink::new(write),
            stream: Stream::new(read),
            context: ReceiverContext::default(),
            command_timeout,
            message_size_max,
        }
    }

    /// Drive the whole session: greeting, command loop, message phases,
    /// until the client quits, a policy hook denies, or the wire breaks.
    ///
    /// # Errors
    ///
    /// * the underlying stream failed
    pub async fn handle(mut self, args: AcceptArgs) -> std::io::Result<()> {
        let reply = self.handler.on_accept(&mut self.context, args).await;
        self.sink.send_reply(&reply).await?;

        if std::mem::take(&mut self.context).quit {
            return Ok(());
        }

        loop {
            match self.smtp_handshake().await? {
                HandshakeOutcome::Message => {
                    let message_stream =
                        self.stream.as_message_stream(self.message_size_max).fuse();
                    tokio::pin!(message_stream);

                    let reply = self
                        .handler
                        .on_message(&mut self.context, message_stream)
                        .await;
                    self.sink.send_reply(&reply).await?;

                    if std::mem::take(&mut self.context).quit {
                        return Ok(());
                    }
                }
                HandshakeOutcome::Quit => return Ok(()),
            }
        }
    }

    /// Run the command loop until the next message phase or the end of the
    /// session.
    async fn smtp_handshake(&mut self) -> std::io::Result<HandshakeOutcome> {
        macro_rules! handle_args {
            ($args_output:ty, $args:expr, $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => self.handler.$on_event(&mut self.context, args).await,
                    Err(e) => self.handler.on_args_error(e).await,
                }
            };
        }

        let command_stream = self
            .stream
            .as_command_stream()
            .timeout(self.command_timeout);
        tokio::pin!(command_stream);

        let mut outcome = None;

        loop {
            let command = match command_stream.try_next().await {
                Ok(Some(command)) => command,
                Ok(None) => return Ok(HandshakeOutcome::Quit),
                Err(elapsed) => {
                    tracing::warn!("Closing after {elapsed} without receiving a command");
                    self.sink
                        .send_reply(&"451 Timeout - closing connection".parse().unwrap())
                        .await?;

                    return Ok(HandshakeOutcome::Quit);
                }
            };

            let (verb, args) = match command {
                Ok(command) => command,
                Err(Error::BufferTooLong { expected, got }) => {
                    let reply = self
                        .handler
                        .on_args_error(ParseArgsError::BufferTooLong { expected, got })
                        .await;
                    self.sink.send_reply(&reply).await?;
                    continue;
                }
                Err(Error::Io(io)) => return Err(io),
            };
            tracing::trace!("<< {:?} ; {:?}", verb, std::str::from_utf8(&args.0));

            let stage = self.handler.get_stage();
            let reply = match (verb, stage) {
                (Verb::Helo, _) => handle_args!(HeloArgs, args, on_helo),
                (Verb::Ehlo, _) => handle_args!(EhloArgs, args, on_ehlo),
                (Verb::Noop, _) => self.handler.on_noop().await,
                (Verb::Rset, _) => self.handler.on_rset().await,
                (Verb::Help, _) => self.handler.on_help(args).await,
                (Verb::StartTls, _) => self.handler.on_starttls().await,
                (Verb::Auth, _) => self.handler.on_auth(args).await,
                (Verb::MailFrom, Stage::Helo | Stage::MailFrom) => {
                    handle_args!(MailFromArgs, args, on_mail_from)
                }
                (Verb::RcptTo, Stage::MailFrom | Stage::RcptTo) => {
                    handle_args!(RcptToArgs, args, on_rcpt_to)
                }
                (Verb::Data, Stage::RcptTo) => {
                    let reply = self.handler.on_data().await;
                    // a refused DATA (e.g. backpressure) must not switch the
                    // session into the message phase
                    if !reply.code().is_error() {
                        outcome = Some(HandshakeOutcome::Message);
                    }
                    reply
                }
                (Verb::Quit, _) => {
                    outcome = Some(HandshakeOutcome::Quit);
                    self.handler.on_quit().await
                }
                (Verb::Unknown, _) => self.handler.on_unknown(args.0).await,
                otherwise => self.handler.on_bad_sequence(otherwise).await,
            };

            self.sink.send_reply(&reply).await?;

            if std::mem::take(&mut self.context).quit {
                return Ok(HandshakeOutcome::Quit);
            }
            if let Some(done) = outcome.take() {
                return Ok(done);
            }
        }
    }
}
