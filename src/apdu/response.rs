//! APDU Response handling
//!
//! A Response contains data bytes plus SW1/SW2 status words. The engine
//! splits raw reader output into this shape; the simulated card builds it
//! the other way round.

use super::status::SW;

/// A smartcard response
///
/// # Example
/// ```
/// use cardlink::apdu::Response;
///
/// let response = Response::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
/// assert_eq!(response.data, vec![0x01, 0x02]);
/// assert_eq!(response.sw(), 0x9000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data (without status words)
    pub data: Vec<u8>,
    /// Status word 1 (SW1)
    pub sw1: u8,
    /// Status word 2 (SW2)
    pub sw2: u8,
}

impl Response {
    /// Create a new response with data and status word
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self {
            data,
            sw1: (sw >> 8) as u8,
            sw2: sw as u8,
        }
    }

    /// Split raw reader output into data and trailing status words
    ///
    /// Returns None when fewer than two bytes were received.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Some(Self {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    /// Create a success response (0x9000) with data
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, SW::SUCCESS)
    }

    /// Create an empty success response (0x9000)
    pub fn ok() -> Self {
        Self::success(Vec::new())
    }

    /// Create an error response (no data)
    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Create a "more data available" response (0x61xx)
    pub fn more_data(data: Vec<u8>, remaining: u8) -> Self {
        Self::new(data, SW::bytes_remaining(remaining))
    }

    /// Get the combined status word as u16
    pub fn sw(&self) -> u16 {
        SW::from_bytes(self.sw1, self.sw2)
    }

    /// Convert to raw bytes for transmission (data + SW1 + SW2)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.data.len() + 2);
        result.extend_from_slice(&self.data);
        result.push(self.sw1);
        result.push(self.sw2);
        result
    }
}

impl From<u16> for Response {
    /// Create an error response from a status word
    fn from(sw: u16) -> Self {
        Self::error(sw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_splits_status() {
        let resp = Response::from_bytes(&[0xDE, 0xAD, 0x61, 0x10]).unwrap();
        assert_eq!(resp.data, vec![0xDE, 0xAD]);
        assert_eq!((resp.sw1, resp.sw2), (0x61, 0x10));
    }

    #[test]
    fn test_status_only() {
        let resp = Response::from_bytes(&[0x90, 0x00]).unwrap();
        assert!(resp.data.is_empty());
        assert_eq!(resp.sw(), SW::SUCCESS);
    }

    #[test]
    fn test_truncated_response() {
        assert!(Response::from_bytes(&[0x90]).is_none());
        assert!(Response::from_bytes(&[]).is_none());
    }

    #[test]
    fn test_to_bytes() {
        let resp = Response::success(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(resp.to_bytes(), vec![0xDE, 0xAD, 0xBE, 0xEF, 0x90, 0x00]);
        let resp: Response = SW::FILE_NOT_FOUND.into();
        assert_eq!(resp.to_bytes(), vec![0x6A, 0x82]);
        assert_eq!(Response::more_data(vec![0xAB], 16).sw(), 0x6110);
    }
}
