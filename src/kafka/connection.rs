use std::time::Duration;

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::{Decodable, Encodable};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::protocol::{KafkaRequestMessage, decode_response, validate_frame_size};
use crate::error::{KpipeError, Result};

/// A single TCP connection to one broker. Requests are strictly sequential:
/// each `send` writes one frame and waits for its response. A connection whose
/// `send` failed must be discarded, its stream may hold an unread response.
pub(crate) struct BrokerConnection {
    addr: String,
    client_id: String,
    stream: TcpStream,
    correlation_id: i32,
    write_buffer: BytesMut,
}

impl BrokerConnection {
    pub async fn connect(addr: &str, client_id: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| KpipeError::Timeout(connect_timeout))??;
        stream.set_nodelay(true)?;
        debug!("Connected to broker {}", addr);

        Ok(Self {
            addr: addr.to_string(),
            client_id: client_id.to_string(),
            stream,
            correlation_id: 0,
            write_buffer: BytesMut::with_capacity(4096),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn send<Req, Resp>(
        &mut self,
        api_key: ApiKey,
        api_version: i16,
        request: &Req,
        request_timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        timeout(request_timeout, self.round_trip(api_key, api_version, request))
            .await
            .map_err(|_| KpipeError::Timeout(request_timeout))?
    }

    async fn round_trip<Req, Resp>(
        &mut self,
        api_key: ApiKey,
        api_version: i16,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        self.correlation_id = self.correlation_id.wrapping_add(1);
        let correlation_id = self.correlation_id;

        self.write_buffer.clear();
        KafkaRequestMessage {
            api_key,
            api_version,
            correlation_id,
            client_id: &self.client_id,
            request,
        }
        .encode(&mut self.write_buffer)?;

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;

        let size = validate_frame_size(self.stream.read_i32().await?)?;
        let mut payload = vec![0u8; size];
        self.stream.read_exact(&mut payload).await?;

        let mut frame = Bytes::from(payload);
        decode_response(&mut frame, api_key, api_version, correlation_id)
    }
}
