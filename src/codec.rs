use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::node::Node;
use crate::parser::{Parser, ProtocolError};

/// Streaming RESP3 decoder.
///
/// Emits one [`Node`] per `decode` call and consumes its bytes from the
/// buffer. Complete top-level replies are recognized by [`NodeCodec::depth`]
/// returning to zero after a node was emitted.
pub struct NodeCodec {
    parser: Parser,
    max_read_size: usize,
}

impl NodeCodec {
    pub fn new(max_read_size: usize) -> NodeCodec {
        NodeCodec {
            parser: Parser::new(),
            max_read_size,
        }
    }

    /// Nesting level of the next node; zero at a reply boundary.
    pub fn depth(&self) -> usize {
        self.parser.depth()
    }
}

impl Decoder for NodeCodec {
    type Item = Node;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // The buffer holds everything the peer sent that we have not decoded
        // yet, so capping it bounds the memory a reply can occupy.
        if src.len() > self.max_read_size {
            return Err(ProtocolError::MaxSizeExceeded(self.max_read_size));
        }
        self.parser.parse(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(node) => Ok(Some(node)),
            None if src.is_empty() && self.parser.depth() == 0 => Ok(None),
            None => Err(ProtocolError::UnexpectedEof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DataType;

    #[test]
    fn decode_consumes_one_node_at_a_time() {
        let mut codec = NodeCodec::new(usize::MAX);
        let mut buf = BytesMut::from(&b"+OK\r\n:42\r\n"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.data_type, DataType::SimpleString);
        assert_eq!(buf.len(), b":42\r\n".len());

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.data_type, DataType::Number);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_tracks_reply_depth() {
        let mut codec = NodeCodec::new(usize::MAX);
        let mut buf = BytesMut::from(&b"*1\r\n"[..]);
        codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(codec.depth(), 1);

        buf.extend_from_slice(b"+x\r\n");
        codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(codec.depth(), 0);
    }

    #[test]
    fn decode_enforces_max_read_size() {
        let mut codec = NodeCodec::new(16);

        let mut buf = BytesMut::from(&b"$5\r\nhello\r\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());

        let mut buf = BytesMut::from(&b"$100\r\naaaaaaaaaaaaaaaaaaaa"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::MaxSizeExceeded(16))
        ));
    }

    #[test]
    fn decode_eof_mid_frame_is_an_error() {
        let mut codec = NodeCodec::new(usize::MAX);
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::UnexpectedEof)
        ));
    }
}
