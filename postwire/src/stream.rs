//! Buffered postgres stream.
use bytes::{Buf, BytesMut};
use std::{
    collections::HashMap,
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::AsyncWrite;

use crate::{
    Result,
    common::{ByteStr, debug, verbose, warning},
    error::{ClosedReason, ErrorKind},
    net::{self, Socket},
    postgres::{
        BackendProtocol, FrontendProtocol,
        backend::{self, ErrorResponse, NoticeResponse, ParameterStatus},
        frontend,
    },
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered connection to postgres.
///
/// Unsolicited `NoticeResponse` are logged, and `ParameterStatus` are recorded,
/// neither is returned from [`poll_recv`][PgTransport::poll_recv].
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    parameters: HashMap<ByteStr, ByteStr>,
}

impl PgStream {
    /// Open tcp connection to `host:port`.
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let socket = Socket::connect_tcp(host, port).await?;
        Ok(Self::new(socket))
    }

    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            parameters: HashMap::new(),
        }
    }

    /// Last reported value of a run-time parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(ByteStr::as_str)
    }

    /// Suspend until at least `n` bytes are buffered.
    ///
    /// Peer closing the connection is [`ErrorKind::ConnectionClosed`].
    pub fn poll_read_exact(&mut self, n: usize, cx: &mut Context) -> Poll<Result<()>> {
        while self.read_buf.len() < n {
            self.read_buf.reserve(n - self.read_buf.len());
            let read = ready!(net::poll_read(&mut self.socket, &mut self.read_buf, cx))?;
            if read == 0 {
                return Poll::Ready(Err(ErrorKind::ConnectionClosed(ClosedReason::Eof).into()));
            }
        }
        Poll::Ready(Ok(()))
    }

    /// Shutdown the write half of the socket.
    pub fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.socket).poll_shutdown(cx)
    }

    /// Shutdown the write half of the socket.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| self.poll_shutdown(cx)).await
    }
}

impl PgTransport for PgStream {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        net::poll_write_all(&mut self.socket, &mut self.write_buf, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        loop {
            ready!(self.poll_read_exact(backend::HEADER_LEN, cx))?;

            let h = &self.read_buf;
            let (msgtype, len) = backend::frame_header([h[0], h[1], h[2], h[3], h[4]])?;

            ready!(self.poll_read_exact(backend::HEADER_LEN + len, cx))?;

            self.read_buf.advance(backend::HEADER_LEN);
            let body = self.read_buf.split_to(len).freeze();

            verbose!(msgtype = %(msgtype as char), len, "recv");

            match msgtype {
                NoticeResponse::MSGTYPE => {
                    let NoticeResponse { notice } = NoticeResponse::decode(msgtype, body)?;
                    warning!("{notice}");
                },
                ParameterStatus::MSGTYPE => {
                    let ParameterStatus { name, value } = ParameterStatus::decode(msgtype, body)?;
                    debug!("parameter {name} = {value}");
                    self.parameters.insert(name, value);
                },
                ErrorResponse::MSGTYPE => {
                    let ErrorResponse { error } = ErrorResponse::decode(msgtype, body)?;
                    return Poll::Ready(Err(error.into()));
                },
                _ => return Poll::Ready(Ok(B::decode(msgtype, body)?)),
            }
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }
}
