//! Async client for the simulator
//!
//! Thin wrapper that frames requests and reads responses. Handy for tests and
//! for programs that play a radio on the simulated spectrum.

use spectrum_protocol::{read_response_async, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::SimError;

/// A client session over any byte stream
pub struct SpectrumClient<S> {
    stream: S,
}

impl SpectrumClient<TcpStream> {
    /// Connect to a server over TCP
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, SimError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> SpectrumClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Subscribe to `channel`, leaving any previous channel
    pub async fn listen(&mut self, channel: u32) -> Result<(), SimError> {
        self.request(Request::listen(channel)).await
    }

    /// Broadcast `data` on `channel`
    ///
    /// The server forgets any subscription this client held.
    pub async fn send(&mut self, channel: u32, data: impl Into<Vec<u8>>) -> Result<(), SimError> {
        self.request(Request::send(channel, data)).await
    }

    /// Write an arbitrary request
    pub async fn request(&mut self, request: Request) -> Result<(), SimError> {
        let frame = request.encode()?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the next broadcast on the subscribed channel
    pub async fn recv(&mut self) -> Result<Response, SimError> {
        Ok(read_response_async(&mut self.stream).await?)
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}
