use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error as ThisError;

use crate::node::{DataType, Node};

static CRLF: &[u8; 2] = b"\r\n";

/// Aggregates may nest this deep before the parser gives up on the stream.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProtocolError {
    #[error("invalid type byte: {0:#04x}")]
    BadType(u8),
    #[error("invalid frame header: {0}")]
    BadHeader(&'static str),
    #[error("invalid frame payload: {0}")]
    BadPayload(&'static str),
    #[error("read buffer exceeded the configured limit of {0} bytes")]
    MaxSizeExceeded(usize),
    #[error("stream closed in the middle of a frame")]
    UnexpectedEof,
    #[error("io error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> ProtocolError {
        ProtocolError::Io(err.kind())
    }
}

/// How many children an open aggregate still expects.
enum Pending {
    /// Declared up front in the header.
    Exact(usize),
    /// Streamed blob string, closed by an empty part.
    Streamed,
}

struct OpenAggregate {
    data_type: DataType,
    pending: Pending,
}

/// Incremental RESP3 parser.
///
/// Feeding it a buffer yields at most one [`Node`] per call, consuming the
/// node's bytes from the buffer. The buffer and the internal aggregate stack
/// are only touched once a whole node is available, so the emitted node
/// sequence does not depend on how the input was chunked.
pub struct Parser {
    stack: Vec<OpenAggregate>,
}

impl Parser {
    pub fn new() -> Parser {
        Parser { stack: Vec::new() }
    }

    /// Nesting level of the next node. 0 means the parser sits at a reply
    /// boundary.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Parse one node off the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete node.
    pub fn parse(&mut self, src: &mut BytesMut) -> Result<Option<Node>, ProtocolError> {
        let Some(parsed) = self.parse_inner(&src[..])? else {
            return Ok(None);
        };
        src.advance(parsed.consumed);

        let depth = self.stack.len();
        let node = Node {
            data_type: parsed.data_type,
            aggregate_size: parsed.aggregate_size,
            depth,
            value: parsed.value,
        };

        match parsed.opens {
            Some(pending) => {
                if depth == MAX_DEPTH {
                    return Err(ProtocolError::BadHeader("aggregates nested too deeply"));
                }
                self.stack.push(OpenAggregate {
                    data_type: parsed.data_type,
                    pending,
                });
            }
            None => {
                // An empty attribute annotates the element that follows; it
                // does not fill a slot of the enclosing aggregate.
                let counts = parsed.data_type != DataType::Attribute;
                self.close(parsed.terminates_stream, counts);
            }
        }

        Ok(Some(node))
    }

    /// Walk the stack after a node or subtree completed, popping aggregates
    /// whose last child this was.
    fn close(&mut self, terminates_stream: bool, counts: bool) {
        if terminates_stream {
            debug_assert!(matches!(
                self.stack.last(),
                Some(OpenAggregate {
                    pending: Pending::Streamed,
                    ..
                })
            ));
            self.stack.pop();
        }
        if !counts {
            return;
        }
        loop {
            let Some(top) = self.stack.last_mut() else {
                return;
            };
            match &mut top.pending {
                Pending::Exact(remaining) => {
                    *remaining -= 1;
                    if *remaining > 0 {
                        return;
                    }
                }
                // Only an empty part closes a streamed string.
                Pending::Streamed => return,
            }
            let completed = self.stack.pop().expect("open aggregate present");
            // A completed attribute does not consume an element slot of its
            // parent either.
            if completed.data_type == DataType::Attribute {
                return;
            }
        }
    }

    fn parse_inner(&self, src: &[u8]) -> Result<Option<Parsed>, ProtocolError> {
        let Some(&type_byte) = src.first() else {
            return Ok(None);
        };

        if let Some(OpenAggregate {
            pending: Pending::Streamed,
            ..
        }) = self.stack.last()
        {
            if type_byte != b';' {
                return Err(ProtocolError::BadPayload(
                    "expected a streamed string part",
                ));
            }
            return parse_streamed_part(src);
        }

        match type_byte {
            b'+' | b'-' | b':' | b',' | b'#' | b'(' | b'_' => parse_simple(src, type_byte),
            b'$' | b'!' | b'=' => parse_blob(src, type_byte),
            b'*' | b'%' | b'~' | b'>' | b'|' => parse_aggregate(src, type_byte),
            byte => Err(ProtocolError::BadType(byte)),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

struct Parsed {
    data_type: DataType,
    aggregate_size: usize,
    value: Bytes,
    consumed: usize,
    /// `Some` when this node opens an aggregate scope.
    opens: Option<Pending>,
    /// Set by the empty streamed part that closes its parent.
    terminates_stream: bool,
}

impl Parsed {
    fn leaf(data_type: DataType, value: &[u8], consumed: usize) -> Parsed {
        Parsed {
            data_type,
            aggregate_size: 1,
            value: Bytes::copy_from_slice(value),
            consumed,
            opens: None,
            terminates_stream: false,
        }
    }

    fn null(consumed: usize) -> Parsed {
        Parsed {
            data_type: DataType::Null,
            aggregate_size: 0,
            value: Bytes::new(),
            consumed,
            opens: None,
            terminates_stream: false,
        }
    }
}

/// The bytes of the first line of `src` past the type byte, without CRLF.
fn header_line(src: &[u8]) -> Result<Option<&[u8]>, ProtocolError> {
    let body = &src[1..];
    match body.windows(2).position(|window| window == CRLF) {
        Some(at) => Ok(Some(&body[..at])),
        // An unterminated line longer than any sane header is not going to
        // recover by reading more bytes.
        None if body.len() > 64 && !body.contains(&b'\r') => {
            Err(ProtocolError::BadHeader("unterminated header line"))
        }
        None => Ok(None),
    }
}

fn parse_simple(src: &[u8], type_byte: u8) -> Result<Option<Parsed>, ProtocolError> {
    let Some(line) = line_of(src)? else {
        return Ok(None);
    };
    let consumed = 1 + line.len() + CRLF.len();

    let parsed = match type_byte {
        b'+' => Parsed::leaf(DataType::SimpleString, line, consumed),
        b'-' => Parsed::leaf(DataType::SimpleError, line, consumed),
        b':' => {
            validate_number(line)?;
            Parsed::leaf(DataType::Number, line, consumed)
        }
        b',' => {
            validate_double(line)?;
            Parsed::leaf(DataType::Double, line, consumed)
        }
        b'#' => {
            if line != b"t" && line != b"f" {
                return Err(ProtocolError::BadPayload("boolean must be 't' or 'f'"));
            }
            Parsed::leaf(DataType::Boolean, line, consumed)
        }
        b'(' => {
            validate_big_number(line)?;
            Parsed::leaf(DataType::BigNumber, line, consumed)
        }
        b'_' => {
            if !line.is_empty() {
                return Err(ProtocolError::BadPayload("null carries no payload"));
            }
            Parsed::null(consumed)
        }
        _ => unreachable!(),
    };
    Ok(Some(parsed))
}

/// Full first line of a simple frame, without the type byte and CRLF.
fn line_of(src: &[u8]) -> Result<Option<&[u8]>, ProtocolError> {
    let body = &src[1..];
    match body.windows(2).position(|window| window == CRLF) {
        Some(at) => Ok(Some(&body[..at])),
        None => Ok(None),
    }
}

fn parse_blob(src: &[u8], type_byte: u8) -> Result<Option<Parsed>, ProtocolError> {
    let Some(header) = header_line(src)? else {
        return Ok(None);
    };
    let header_len = 1 + header.len() + CRLF.len();

    if header == b"-1" {
        // RESP2 null bulk string.
        if type_byte == b'=' {
            return Err(ProtocolError::BadHeader("verbatim string cannot be null"));
        }
        return Ok(Some(Parsed::null(header_len)));
    }
    if header == b"?" {
        if type_byte != b'$' {
            return Err(ProtocolError::BadHeader(
                "only blob strings support streaming",
            ));
        }
        return Ok(Some(Parsed {
            data_type: DataType::BlobString,
            aggregate_size: Node::STREAMED,
            value: Bytes::new(),
            consumed: header_len,
            opens: Some(Pending::Streamed),
            terminates_stream: false,
        }));
    }

    let len = parse_length(header)?;
    let Some(payload) = blob_payload(&src[header_len..], len)? else {
        return Ok(None);
    };
    let consumed = header_len + len + CRLF.len();

    let parsed = match type_byte {
        b'$' => Parsed::leaf(DataType::BlobString, payload, consumed),
        b'!' => Parsed::leaf(DataType::BlobError, payload, consumed),
        // Verbatim strings prefix the payload with a four byte format marker
        // ("txt:", "mkd:"). Strip it and deliver a plain blob string.
        b'=' => {
            if len < 4 || payload[3] != b':' {
                return Err(ProtocolError::BadPayload(
                    "verbatim string is missing its format prefix",
                ));
            }
            Parsed::leaf(DataType::BlobString, &payload[4..], consumed)
        }
        _ => unreachable!(),
    };
    Ok(Some(parsed))
}

fn parse_streamed_part(src: &[u8]) -> Result<Option<Parsed>, ProtocolError> {
    let Some(header) = header_line(src)? else {
        return Ok(None);
    };
    let header_len = 1 + header.len() + CRLF.len();
    let len = parse_length(header)?;

    if len == 0 {
        // Terminator. Emitted as an empty part so consumers see the end of
        // the stream, then closes the enclosing blob string.
        return Ok(Some(Parsed {
            data_type: DataType::StreamedStringPart,
            aggregate_size: 0,
            value: Bytes::new(),
            consumed: header_len,
            opens: None,
            terminates_stream: true,
        }));
    }

    let Some(payload) = blob_payload(&src[header_len..], len)? else {
        return Ok(None);
    };
    Ok(Some(Parsed::leaf(
        DataType::StreamedStringPart,
        payload,
        header_len + len + CRLF.len(),
    )))
}

/// `len` payload bytes followed by CRLF, if fully buffered.
fn blob_payload(src: &[u8], len: usize) -> Result<Option<&[u8]>, ProtocolError> {
    if src.len() < len + CRLF.len() {
        return Ok(None);
    }
    if &src[len..len + CRLF.len()] != CRLF {
        return Err(ProtocolError::BadPayload("blob payload not CRLF terminated"));
    }
    Ok(Some(&src[..len]))
}

fn parse_aggregate(src: &[u8], type_byte: u8) -> Result<Option<Parsed>, ProtocolError> {
    let Some(header) = header_line(src)? else {
        return Ok(None);
    };
    let consumed = 1 + header.len() + CRLF.len();

    if header == b"-1" {
        // RESP2 null array.
        if type_byte != b'*' {
            return Err(ProtocolError::BadHeader("aggregate size cannot be negative"));
        }
        return Ok(Some(Parsed::null(consumed)));
    }

    let declared = parse_length(header)?;
    let data_type = match type_byte {
        b'*' => DataType::Array,
        b'%' => DataType::Map,
        b'~' => DataType::Set,
        b'>' => DataType::Push,
        b'|' => DataType::Attribute,
        _ => unreachable!(),
    };

    // Map and attribute headers count pairs; every key and value is its own
    // element on the node stream.
    let children = match data_type {
        DataType::Map | DataType::Attribute => declared
            .checked_mul(2)
            .ok_or(ProtocolError::BadHeader("aggregate size out of range"))?,
        _ => declared,
    };

    Ok(Some(Parsed {
        data_type,
        aggregate_size: children,
        value: Bytes::new(),
        consumed,
        opens: (children > 0).then_some(Pending::Exact(children)),
        terminates_stream: false,
    }))
}

fn parse_length(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::BadHeader("malformed length"));
    }
    std::str::from_utf8(header)
        .ok()
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or(ProtocolError::BadHeader("length out of range"))
}

fn validate_number(line: &[u8]) -> Result<(), ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|digits| digits.parse::<i64>().ok())
        .map(|_| ())
        .ok_or(ProtocolError::BadPayload("malformed number"))
}

fn validate_double(line: &[u8]) -> Result<(), ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|digits| digits.parse::<f64>().ok())
        .map(|_| ())
        .ok_or(ProtocolError::BadPayload("malformed double"))
}

fn validate_big_number(line: &[u8]) -> Result<(), ProtocolError> {
    let digits = match line.first() {
        Some(b'+' | b'-') => &line[1..],
        _ => line,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::BadPayload("malformed big number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Node> {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(input);
        let mut nodes = Vec::new();
        while let Some(node) = parser.parse(&mut buf).unwrap() {
            nodes.push(node);
        }
        assert!(buf.is_empty(), "undecoded bytes left: {:?}", buf);
        assert_eq!(parser.depth(), 0, "aggregates left open");
        nodes
    }

    fn node(data_type: DataType, aggregate_size: usize, depth: usize, value: &[u8]) -> Node {
        Node {
            data_type,
            aggregate_size,
            depth,
            value: Bytes::copy_from_slice(value),
        }
    }

    #[test]
    fn parse_simple_string() {
        let nodes = parse_all(b"+OK\r\n");
        assert_eq!(nodes, vec![node(DataType::SimpleString, 1, 0, b"OK")]);
    }

    #[test]
    fn parse_simple_error() {
        let nodes = parse_all(b"-ERR unknown command\r\n");
        assert_eq!(
            nodes,
            vec![node(DataType::SimpleError, 1, 0, b"ERR unknown command")]
        );
    }

    #[test]
    fn parse_number() {
        let nodes = parse_all(b":-1000\r\n");
        assert_eq!(nodes, vec![node(DataType::Number, 1, 0, b"-1000")]);
    }

    #[test]
    fn parse_number_rejects_garbage() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b":12a\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ProtocolError::BadPayload(_))
        ));
    }

    #[test]
    fn parse_double_special_values() {
        for raw in [&b",inf\r\n"[..], b",-inf\r\n", b",nan\r\n", b",3.1415\r\n"] {
            let nodes = parse_all(raw);
            assert_eq!(nodes[0].data_type, DataType::Double);
        }
    }

    #[test]
    fn parse_boolean() {
        assert_eq!(parse_all(b"#t\r\n")[0].value.as_ref(), b"t");
        assert_eq!(parse_all(b"#f\r\n")[0].value.as_ref(), b"f");

        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"#x\r\n"[..]);
        assert!(parser.parse(&mut buf).is_err());
    }

    #[test]
    fn parse_big_number() {
        let nodes = parse_all(b"(3492890328409238509324850943850943825024385\r\n");
        assert_eq!(nodes[0].data_type, DataType::BigNumber);
        assert_eq!(
            nodes[0].value.as_ref(),
            b"3492890328409238509324850943850943825024385"
        );
        assert_eq!(parse_all(b"(-42\r\n")[0].value.as_ref(), b"-42");
    }

    #[test]
    fn parse_nulls() {
        for raw in [&b"_\r\n"[..], b"$-1\r\n", b"*-1\r\n"] {
            let nodes = parse_all(raw);
            assert_eq!(nodes, vec![node(DataType::Null, 0, 0, b"")]);
        }
    }

    #[test]
    fn parse_blob_string() {
        let nodes = parse_all(b"$6\r\nfoobar\r\n");
        assert_eq!(nodes, vec![node(DataType::BlobString, 1, 0, b"foobar")]);
    }

    #[test]
    fn parse_blob_string_empty() {
        let nodes = parse_all(b"$0\r\n\r\n");
        assert_eq!(nodes, vec![node(DataType::BlobString, 1, 0, b"")]);
    }

    #[test]
    fn parse_blob_error() {
        let nodes = parse_all(b"!21\r\nSYNTAX invalid syntax\r\n");
        assert_eq!(
            nodes,
            vec![node(DataType::BlobError, 1, 0, b"SYNTAX invalid syntax")]
        );
    }

    #[test]
    fn parse_verbatim_string_strips_prefix() {
        let nodes = parse_all(b"=15\r\ntxt:Some string\r\n");
        assert_eq!(nodes, vec![node(DataType::BlobString, 1, 0, b"Some string")]);
    }

    #[test]
    fn parse_array() {
        let nodes = parse_all(b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n");
        assert_eq!(
            nodes,
            vec![
                node(DataType::Array, 2, 0, b""),
                node(DataType::BlobString, 1, 1, b"hello"),
                node(DataType::BlobString, 1, 1, b"world"),
            ]
        );
    }

    #[test]
    fn parse_array_empty() {
        let nodes = parse_all(b"*0\r\n");
        assert_eq!(nodes, vec![node(DataType::Array, 0, 0, b"")]);
    }

    #[test]
    fn parse_array_nested() {
        let nodes = parse_all(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n");
        assert_eq!(
            nodes,
            vec![
                node(DataType::Array, 2, 0, b""),
                node(DataType::Array, 3, 1, b""),
                node(DataType::Number, 1, 2, b"1"),
                node(DataType::Number, 1, 2, b"2"),
                node(DataType::Number, 1, 2, b"3"),
                node(DataType::Array, 2, 1, b""),
                node(DataType::SimpleString, 1, 2, b"Hello"),
                node(DataType::SimpleError, 1, 2, b"World"),
            ]
        );
    }

    #[test]
    fn parse_map_counts_keys_and_values() {
        let nodes = parse_all(b"%2\r\n+first\r\n:1\r\n+second\r\n:2\r\n");
        assert_eq!(nodes[0], node(DataType::Map, 4, 0, b""));
        assert_eq!(nodes.len(), 5);
    }

    #[test]
    fn parse_set() {
        let nodes = parse_all(b"~3\r\n+a\r\n+b\r\n+c\r\n");
        assert_eq!(nodes[0], node(DataType::Set, 3, 0, b""));
    }

    #[test]
    fn parse_push() {
        let nodes = parse_all(b">2\r\n$7\r\nmessage\r\n$5\r\nhello\r\n");
        assert_eq!(
            nodes,
            vec![
                node(DataType::Push, 2, 0, b""),
                node(DataType::BlobString, 1, 1, b"message"),
                node(DataType::BlobString, 1, 1, b"hello"),
            ]
        );
    }

    #[test]
    fn parse_attribute_does_not_fill_an_element_slot() {
        // The attribute annotates "a"; the array still expects two elements.
        let nodes = parse_all(b"*2\r\n|1\r\n+ttl\r\n:1\r\n+a\r\n+b\r\n");
        assert_eq!(nodes[0], node(DataType::Array, 2, 0, b""));
        assert_eq!(nodes[1], node(DataType::Attribute, 2, 1, b""));
        assert_eq!(nodes[4], node(DataType::SimpleString, 1, 1, b"a"));
        assert_eq!(nodes[5], node(DataType::SimpleString, 1, 1, b"b"));
        assert_eq!(nodes.len(), 6);
    }

    #[test]
    fn parse_attribute_before_reply() {
        let nodes = parse_all(b"|1\r\n+ttl\r\n:3600\r\n$5\r\nhello\r\n");
        assert_eq!(
            nodes,
            vec![
                node(DataType::Attribute, 2, 0, b""),
                node(DataType::SimpleString, 1, 1, b"ttl"),
                node(DataType::Number, 1, 1, b"3600"),
                node(DataType::BlobString, 1, 0, b"hello"),
            ]
        );
    }

    #[test]
    fn parse_streamed_string() {
        let nodes = parse_all(b"$?\r\n;4\r\nhell\r\n;1\r\no\r\n;0\r\n");
        assert_eq!(
            nodes,
            vec![
                node(DataType::BlobString, Node::STREAMED, 0, b""),
                node(DataType::StreamedStringPart, 1, 1, b"hell"),
                node(DataType::StreamedStringPart, 1, 1, b"o"),
                node(DataType::StreamedStringPart, 0, 1, b""),
            ]
        );
    }

    #[test]
    fn parse_streamed_string_with_zero_parts() {
        let nodes = parse_all(b"$?\r\n;0\r\n");
        assert_eq!(
            nodes,
            vec![
                node(DataType::BlobString, Node::STREAMED, 0, b""),
                node(DataType::StreamedStringPart, 0, 1, b""),
            ]
        );
    }

    #[test]
    fn parse_streamed_string_inside_array() {
        let nodes = parse_all(b"*2\r\n$?\r\n;2\r\nab\r\n;0\r\n:7\r\n");
        assert_eq!(nodes[1], node(DataType::BlobString, Node::STREAMED, 1, b""));
        assert_eq!(nodes[2], node(DataType::StreamedStringPart, 1, 2, b"ab"));
        assert_eq!(nodes[3], node(DataType::StreamedStringPart, 0, 2, b""));
        assert_eq!(nodes[4], node(DataType::Number, 1, 1, b"7"));
        assert_eq!(nodes.len(), 5);
    }

    #[test]
    fn parse_rejects_unknown_type_byte() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"@oops\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ProtocolError::BadType(b'@'))
        ));
    }

    #[test]
    fn parse_rejects_stray_streamed_part() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b";4\r\nhell\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ProtocolError::BadType(b';'))
        ));
    }

    #[test]
    fn parse_rejects_too_deep_nesting() {
        let mut raw = Vec::new();
        for _ in 0..MAX_DEPTH + 1 {
            raw.extend_from_slice(b"*1\r\n");
        }
        raw.extend_from_slice(b":1\r\n");

        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&raw[..]);
        let result = loop {
            match parser.parse(&mut buf) {
                Ok(Some(_)) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(ProtocolError::BadHeader(_))));
    }

    #[test]
    fn parse_nesting_below_cap_is_accepted() {
        let mut raw = Vec::new();
        for _ in 0..MAX_DEPTH {
            raw.extend_from_slice(b"*1\r\n");
        }
        raw.extend_from_slice(b":1\r\n");
        let nodes = parse_all(&raw);
        assert_eq!(nodes.len(), MAX_DEPTH + 1);
        assert_eq!(nodes.last().unwrap().depth, MAX_DEPTH);
    }

    #[test]
    fn parse_incomplete_frames_return_none() {
        for partial in [
            &b"$"[..],
            b"$5\r\n",
            b"$5\r\nhel",
            b"$5\r\nhello",
            b"$5\r\nhello\r",
            b"*2\r\n$5\r\nhello\r\n",
            b"+OK",
        ] {
            let mut parser = Parser::new();
            let mut buf = BytesMut::from(partial);
            while parser.parse(&mut buf).unwrap().is_some() {}
            // A truncated frame must never decode to a complete reply: either
            // an aggregate stays open or undecoded bytes stay buffered.
            assert!(
                parser.depth() > 0 || !buf.is_empty(),
                "truncated input {:?} decoded fully",
                partial
            );
        }
    }

    #[test]
    fn parse_is_invariant_under_chunking() {
        let raw: &[u8] =
            b"*3\r\n$?\r\n;4\r\nhell\r\n;1\r\no\r\n;0\r\n%1\r\n+k\r\n:1\r\n_\r\n+done\r\n";
        let whole = {
            let mut parser = Parser::new();
            let mut buf = BytesMut::from(raw);
            let mut nodes = Vec::new();
            while let Some(node) = parser.parse(&mut buf).unwrap() {
                nodes.push(node);
            }
            nodes
        };

        // Feed one byte at a time.
        let mut parser = Parser::new();
        let mut buf = BytesMut::new();
        let mut nodes = Vec::new();
        for &byte in raw {
            buf.extend_from_slice(&[byte]);
            while let Some(node) = parser.parse(&mut buf).unwrap() {
                nodes.push(node);
            }
        }
        assert_eq!(nodes, whole);
    }

    #[test]
    fn parse_rejects_malformed_aggregate_header() {
        for raw in [&b"*abc\r\n"[..], b"*-2\r\n", b"%-1\r\n", b"$12x\r\n"] {
            let mut parser = Parser::new();
            let mut buf = BytesMut::from(raw);
            assert!(parser.parse(&mut buf).is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn parse_rejects_blob_without_terminator() {
        let mut parser = Parser::new();
        let mut buf = BytesMut::from(&b"$5\r\nhelloxx"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ProtocolError::BadPayload(_))
        ));
    }
}
