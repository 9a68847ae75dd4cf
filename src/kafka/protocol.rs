use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use log::debug;

use crate::error::{KpipeError, Result};

pub(crate) const MAX_MESSAGE_SIZE: i32 = 104_857_600; // 100MB

// Lowest request versions still accepted by current brokers. Nothing here is
// negotiated through ApiVersions.
pub(crate) const METADATA_VERSION: i16 = 1;
pub(crate) const LIST_OFFSETS_VERSION: i16 = 1;
pub(crate) const FETCH_VERSION: i16 = 4;
pub(crate) const FIND_COORDINATOR_VERSION: i16 = 1;
pub(crate) const OFFSET_FETCH_VERSION: i16 = 1;
pub(crate) const OFFSET_COMMIT_VERSION: i16 = 2;
pub(crate) const CREATE_TOPICS_VERSION: i16 = 2;
pub(crate) const DELETE_TOPICS_VERSION: i16 = 1;
pub(crate) const CREATE_PARTITIONS_VERSION: i16 = 1;

/// ListOffsets timestamps selecting the log boundaries.
pub(crate) const EARLIEST_TIMESTAMP: i64 = -2;
pub(crate) const LATEST_TIMESTAMP: i64 = -1;

// An outgoing request with everything needed to frame it
pub(crate) struct KafkaRequestMessage<'a, R> {
    pub api_key: ApiKey,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: &'a str,
    pub request: &'a R,
}

impl<R: Encodable> KafkaRequestMessage<'_, R> {
    /// Append the size-prefixed frame to `buffer`.
    pub fn encode(&self, buffer: &mut BytesMut) -> Result<()> {
        let mut header = RequestHeader::default();
        header.request_api_key = self.api_key as i16;
        header.request_api_version = self.api_version;
        header.correlation_id = self.correlation_id;
        header.client_id = Some(StrBytes::from_string(self.client_id.to_string()));

        let header_version = self.api_key.request_header_version(self.api_version);

        // Size is patched in once the payload length is known
        let start = buffer.len();
        buffer.put_i32(0);
        header
            .encode(buffer, header_version)
            .map_err(KpipeError::protocol)?;
        self.request
            .encode(buffer, self.api_version)
            .map_err(KpipeError::protocol)?;

        let size = buffer.len() - start - 4;
        if size > MAX_MESSAGE_SIZE as usize {
            return Err(KpipeError::Protocol(format!(
                "request of {size} bytes exceeds frame limit"
            )));
        }
        buffer[start..start + 4].copy_from_slice(&(size as i32).to_be_bytes());

        debug!(
            "Encoded {:?} v{} correlation_id={} ({} bytes)",
            self.api_key, self.api_version, self.correlation_id, size
        );
        Ok(())
    }
}

/// Decode a response frame (without its size prefix), checking that it
/// answers the request carrying `correlation_id`.
pub(crate) fn decode_response<R: Decodable>(
    frame: &mut Bytes,
    api_key: ApiKey,
    api_version: i16,
    correlation_id: i32,
) -> Result<R> {
    let header_version = api_key.response_header_version(api_version);
    let header = ResponseHeader::decode(frame, header_version).map_err(KpipeError::protocol)?;
    if header.correlation_id != correlation_id {
        return Err(KpipeError::Protocol(format!(
            "correlation id mismatch: expected {}, got {}",
            correlation_id, header.correlation_id
        )));
    }
    R::decode(frame, api_version).map_err(KpipeError::protocol)
}

pub(crate) fn validate_frame_size(size: i32) -> Result<usize> {
    if size < 0 || size > MAX_MESSAGE_SIZE {
        return Err(KpipeError::Protocol(format!("Invalid message size: {size}")));
    }
    Ok(size as usize)
}

/// Map a Kafka error code to an error, `Ok` for 0.
///
/// See: <https://kafka.apache.org/protocol#protocol_error_codes>
pub(crate) fn check_error_code(code: i16) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    Err(KpipeError::Broker {
        code,
        name: error_name(code),
    })
}

pub(crate) fn error_name(code: i16) -> &'static str {
    match code {
        -1 => "UNKNOWN_SERVER_ERROR",
        0 => "NONE",
        1 => "OFFSET_OUT_OF_RANGE",
        2 => "CORRUPT_MESSAGE",
        3 => "UNKNOWN_TOPIC_OR_PARTITION",
        5 => "LEADER_NOT_AVAILABLE",
        6 => "NOT_LEADER_OR_FOLLOWER",
        7 => "REQUEST_TIMED_OUT",
        8 => "BROKER_NOT_AVAILABLE",
        14 => "COORDINATOR_LOAD_IN_PROGRESS",
        15 => "COORDINATOR_NOT_AVAILABLE",
        16 => "NOT_COORDINATOR",
        17 => "INVALID_TOPIC_EXCEPTION",
        25 => "UNKNOWN_MEMBER_ID",
        29 => "TOPIC_AUTHORIZATION_FAILED",
        30 => "GROUP_AUTHORIZATION_FAILED",
        35 => "UNSUPPORTED_VERSION",
        36 => "TOPIC_ALREADY_EXISTS",
        37 => "INVALID_PARTITIONS",
        38 => "INVALID_REPLICATION_FACTOR",
        41 => "NOT_CONTROLLER",
        42 => "INVALID_REQUEST",
        69 => "GROUP_ID_NOT_FOUND",
        73 => "TOPIC_DELETION_DISABLED",
        _ => "UNKNOWN",
    }
}
