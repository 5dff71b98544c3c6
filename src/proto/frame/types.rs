use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// This enum represents all frame types defined in the RESP protocol:
/// - SimpleString: Status responses like "OK"
/// - Error: Error responses from the server
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data
/// - Array: Command arguments and array responses
/// - Null: NULL value
///
/// The byte-level encoder/decoder lives with the transport; the engine only
/// inspects decoded frames to classify errors and fold reply values.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Attempts to extract an integer from this frame.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a bulk string payload from this frame.
    pub fn to_bulk_string(&self) -> Option<Bytes> {
        match self {
            Frame::BulkString(b) => b.clone(),
            _ => None,
        }
    }

    /// Attempts to extract the array elements from this frame.
    pub fn to_array(&self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(a) => Some(a.clone()),
            _ => None,
        }
    }

    /// Returns true if this frame is Null or an absent bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_int() {
        let frame = Frame::Integer(42);
        assert_eq!(frame.to_int(), Some(42));

        let frame = Frame::Null;
        assert_eq!(frame.to_int(), None);
    }

    #[test]
    fn test_frame_to_bulk_string() {
        let data: Bytes = "hello".into();
        let frame = Frame::BulkString(Some(data.clone()));
        assert_eq!(frame.to_bulk_string(), Some(data));

        let frame = Frame::Integer(42);
        assert_eq!(frame.to_bulk_string(), None);
    }

    #[test]
    fn test_frame_to_array() {
        let frames = vec![Frame::Integer(1), Frame::Integer(2)];
        let frame = Frame::Array(frames.clone());
        assert_eq!(frame.to_array(), Some(frames));

        let frame = Frame::Integer(42);
        assert_eq!(frame.to_array(), None);
    }

    #[test]
    fn test_frame_is_null() {
        assert!(Frame::Null.is_null());
        assert!(Frame::BulkString(None).is_null());
        assert!(!Frame::Integer(42).is_null());
        assert!(!Frame::BulkString(Some("x".into())).is_null());
    }
}
