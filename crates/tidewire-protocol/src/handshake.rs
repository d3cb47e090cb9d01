//! Handshake payloads carried by `ConnectAndPing` datagrams.
//!
//! A client repeats the same request until answered, then keeps sending it as a ping. The
//! session token tells the server whether a request is a repeat or a restarted client.

use tidewire_core::{error::Result, BinaryStream};

/// Client to server: `{session_token u32, client_time f64}`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConnectRequest {
    /// Random token chosen once per connection attempt.
    pub session_token: u32,
    /// Client clock in seconds when the request was written.
    pub client_time: f64,
}

impl ConnectRequest {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4 + 8;

    /// Writes the request at the stream cursor.
    pub fn write_to(&self, stream: &mut BinaryStream) -> Result<()> {
        stream.write_u32(self.session_token)?;
        stream.write_f64(self.client_time)
    }

    /// Reads a request from the stream cursor.
    pub fn read_from(stream: &mut BinaryStream) -> Result<Self> {
        let session_token = stream.read_u32()?;
        let client_time = stream.read_f64()?;
        Ok(Self { session_token, client_time })
    }

    /// Encodes the request into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut stream = BinaryStream::with_capacity(Self::SIZE);
        self.write_to(&mut stream)?;
        Ok(stream.as_slice().to_vec())
    }

    /// Decodes a request from a datagram payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let mut stream = BinaryStream::with_capacity(payload.len());
        stream.load(payload)?;
        Self::read_from(&mut stream)
    }
}

/// Server to client: `{session_token u32, client_time f64, server_time f64}`.
///
/// The assigned peer id travels in the header.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConnectReply {
    /// Token copied from the request.
    pub session_token: u32,
    /// Client time copied from the request.
    pub client_time: f64,
    /// Server clock in seconds when the reply was written.
    pub server_time: f64,
}

impl ConnectReply {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4 + 8 + 8;

    /// Builds the reply for `request`.
    pub fn answer(request: &ConnectRequest, server_time: f64) -> Self {
        Self { session_token: request.session_token, client_time: request.client_time, server_time }
    }

    /// Writes the reply at the stream cursor.
    pub fn write_to(&self, stream: &mut BinaryStream) -> Result<()> {
        stream.write_u32(self.session_token)?;
        stream.write_f64(self.client_time)?;
        stream.write_f64(self.server_time)
    }

    /// Reads a reply from the stream cursor.
    pub fn read_from(stream: &mut BinaryStream) -> Result<Self> {
        let session_token = stream.read_u32()?;
        let client_time = stream.read_f64()?;
        let server_time = stream.read_f64()?;
        Ok(Self { session_token, client_time, server_time })
    }

    /// Encodes the reply into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut stream = BinaryStream::with_capacity(Self::SIZE);
        self.write_to(&mut stream)?;
        Ok(stream.as_slice().to_vec())
    }

    /// Decodes a reply from a datagram payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let mut stream = BinaryStream::with_capacity(payload.len());
        stream.load(payload)?;
        Self::read_from(&mut stream)
    }
}

#[cfg(test)]
mod tests {
    use tidewire_core::ErrorKind;

    use super::*;

    #[test]
    fn test_request_layout() {
        let request = ConnectRequest { session_token: 0x01020304, client_time: 1.5 };
        let bytes = request.to_bytes().unwrap();
        assert_eq!(bytes.len(), ConnectRequest::SIZE);
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(ConnectRequest::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn test_reply_echoes_request() {
        let request = ConnectRequest { session_token: 77, client_time: 3.25 };
        let reply = ConnectReply::answer(&request, 10.0);
        assert_eq!(reply.session_token, 77);
        assert_eq!(reply.client_time, 3.25);

        let bytes = reply.to_bytes().unwrap();
        assert_eq!(bytes.len(), ConnectReply::SIZE);
        assert_eq!(ConnectReply::from_bytes(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_short_payload_is_rejected() {
        assert!(matches!(ConnectRequest::from_bytes(&[1, 2, 3]), Err(ErrorKind::EndOfStream)));
        assert!(matches!(ConnectReply::from_bytes(&[0; 12]), Err(ErrorKind::EndOfStream)));
    }
}
