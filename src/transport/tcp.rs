//! TCP transport, optionally wrapped in TLS
//!
//! Two framings are supported. [`Framing::LengthPrefixed`] puts a big-endian
//! `u32` length before every payload. [`Framing::Mqtt`] carries raw MQTT
//! control packets, which delimit themselves through their fixed header.

use super::tls::TlsSettings;
use super::{Connector, FrameReader, FrameWriter, Transport};
use crate::config::CertificateSection;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::io::{Error as IoError, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

const LENGTH_PREFIX: usize = 4;

/// How frames are delimited on the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    LengthPrefixed,
    Mqtt,
}

/// Connector dialing `tcp://`, `mqtt://` and their TLS counterparts
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    framing: Framing,
    max_frame_size: usize,
    tls: Option<TlsSettings>,
}

impl TcpConnector {
    /// Parse an address URL
    ///
    /// `mqtt` defaults to port 1883, `ssl` and `mqtts` to 8883. `tcp` and
    /// `tls` need an explicit port. TLS schemes use the web PKI roots.
    pub fn new(address: &str, framing: Framing, max_frame_size: usize) -> Result<Self, TransportError> {
        Self::with_certificate(address, framing, max_frame_size, None)
    }

    /// Parse an address URL and load TLS material
    ///
    /// TLS is used when the scheme asks for it or when `certificate` names any
    /// PEM file. Unreadable or inconsistent material fails here, never at dial
    /// time.
    pub fn with_certificate(
        address: &str,
        framing: Framing,
        max_frame_size: usize,
        certificate: Option<&CertificateSection>,
    ) -> Result<Self, TransportError> {
        let url =
            Url::parse(address).map_err(|_| TransportError::InvalidAddress(address.to_string()))?;

        let (default_port, secure_scheme) = match url.scheme() {
            "tcp" => (None, false),
            "mqtt" => (Some(1883), false),
            "ssl" | "mqtts" => (Some(8883), true),
            "tls" => (None, true),
            other => return Err(TransportError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))?;
        let port = url
            .port()
            .or(default_port)
            .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))?;

        let tls = if secure_scheme || certificate.is_some_and(CertificateSection::is_enabled) {
            Some(TlsSettings::new(certificate, host)?)
        } else {
            None
        };

        Ok(Self {
            host: host.to_string(),
            port,
            framing,
            max_frame_size,
            tls,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Wrap an already connected stream
    pub fn framed<S>(stream: S, framing: Framing, max_frame_size: usize) -> Transport
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Transport::new(
            Box::new(StreamFrameReader {
                inner: read,
                buffer: BytesMut::new(),
                framing,
                max_frame_size,
            }),
            Box::new(StreamFrameWriter {
                inner: write,
                framing,
                max_frame_size,
            }),
        )
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;

        match &self.tls {
            Some(tls) => {
                let stream = tls.wrap(stream).await?;
                debug!(host = %self.host, port = self.port, "tls session established");
                Ok(Self::framed(stream, self.framing, self.max_frame_size))
            }
            None => {
                debug!(host = %self.host, port = self.port, "tcp connection established");
                Ok(Self::framed(stream, self.framing, self.max_frame_size))
            }
        }
    }
}

struct StreamFrameReader<S> {
    inner: ReadHalf<S>,
    buffer: BytesMut,
    framing: Framing,
    max_frame_size: usize,
}

impl<S> StreamFrameReader<S> {
    fn too_large(&self, size: usize) -> TransportError {
        TransportError::FrameTooLarge {
            size,
            max: self.max_frame_size,
        }
    }

    /// Split one complete frame off the buffer, if it holds one
    fn next_buffered(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.framing {
            Framing::LengthPrefixed => {
                if self.buffer.len() < LENGTH_PREFIX {
                    return Ok(None);
                }
                let mut prefix = [0u8; LENGTH_PREFIX];
                prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
                let len = u32::from_be_bytes(prefix) as usize;
                if len > self.max_frame_size {
                    return Err(self.too_large(len));
                }
                if self.buffer.len() < LENGTH_PREFIX + len {
                    self.buffer.reserve(LENGTH_PREFIX + len - self.buffer.len());
                    return Ok(None);
                }
                self.buffer.advance(LENGTH_PREFIX);
                Ok(Some(self.buffer.split_to(len).freeze()))
            }
            Framing::Mqtt => {
                match rumqttc::mqttbytes::check(self.buffer.iter(), self.max_frame_size) {
                    Ok(header) => {
                        let len = header.frame_length();
                        if len > self.max_frame_size {
                            return Err(self.too_large(len));
                        }
                        Ok(Some(self.buffer.split_to(len).freeze()))
                    }
                    Err(rumqttc::mqttbytes::Error::InsufficientBytes(_)) => Ok(None),
                    Err(rumqttc::mqttbytes::Error::PayloadSizeLimitExceeded(size)) => {
                        Err(self.too_large(size))
                    }
                    Err(e) => Err(TransportError::Io(IoError::new(ErrorKind::InvalidData, e))),
                }
            }
        }
    }
}

#[async_trait]
impl<S> FrameReader for StreamFrameReader<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(frame) = self.next_buffered()? {
                return Ok(Some(frame));
            }
            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Io(IoError::new(
                    ErrorKind::UnexpectedEof,
                    format!("stream ended inside a frame ({} bytes buffered)", self.buffer.len()),
                )));
            }
        }
    }
}

struct StreamFrameWriter<S> {
    inner: WriteHalf<S>,
    framing: Framing,
    max_frame_size: usize,
}

#[async_trait]
impl<S> FrameWriter for StreamFrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        if self.framing == Framing::LengthPrefixed {
            let len = u32::try_from(frame.len()).map_err(|_| TransportError::FrameTooLarge {
                size: frame.len(),
                max: u32::MAX as usize,
            })?;
            self.inner.write_u32(len).await?;
        }
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
