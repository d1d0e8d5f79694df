//! Binding of decoded nodes to caller-chosen destinations.
//!
//! A reply arrives as a pre-order stream of [`Node`]s. An [`Adapter`]
//! consumes that stream and produces a value; [`Response`] picks the adapter
//! for a destination type, so callers just name the shape they want:
//!
//! | Destination | Accepted replies |
//! |---|---|
//! | `i64` and friends | number, boolean |
//! | `f64`, `f32` | double, number |
//! | `String`, `Bytes` | simple/blob strings and errors, big number |
//! | `Option<T>` | whatever `T` accepts, plus null |
//! | `Vec<T>` | array, set, push of flat elements |
//! | `HashMap<K, V>`, `BTreeMap<K, V>` | map |
//! | `HashSet<T>`, `BTreeSet<T>` | set |
//! | tuples up to arity 8 | one aggregate of matching arity, or one reply per slot |
//! | `Node`, `Vec<Node>` | any single simple value / the raw node stream |
//! | `Ignore`, `()` | anything, discarded |
//!
//! User types participate by implementing [`FromBytes`].

use bytes::BytesMut;
use thiserror::Error as ThisError;

use crate::node::{DataType, Node};

mod builtin;

pub use builtin::{
    Ignore, IgnoreAdapter, MapAdapter, NodeAdapter, NodesAdapter, OptionAdapter, ScalarAdapter,
    SeqAdapter, SetAdapter, TupleAdapter,
};

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum AdapterError {
    #[error("incompatible node type: expected {expected}, found {found}")]
    IncompatibleNodeType {
        expected: &'static str,
        found: DataType,
    },
    #[error("failed to parse value: {0}")]
    Parse(String),
    #[error("reply ended early: {0}")]
    Incomplete(&'static str),
}

impl AdapterError {
    pub(crate) fn incompatible(expected: &'static str, node: &Node) -> AdapterError {
        AdapterError::IncompatibleNodeType {
            expected,
            found: node.data_type,
        }
    }
}

/// Position of a node within the response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementIndex {
    /// Part of a reply to a submitted request: which command of the pipeline
    /// it answers, and the 0-based top-level element within that reply.
    Reply { command: usize, element: usize },
    /// Part of a server push frame.
    Push { element: usize },
}

impl ElementIndex {
    pub fn element(&self) -> usize {
        match self {
            ElementIndex::Reply { element, .. } | ElementIndex::Push { element } => *element,
        }
    }

    pub fn command(&self) -> Option<usize> {
        match self {
            ElementIndex::Reply { command, .. } => Some(*command),
            ElementIndex::Push { .. } => None,
        }
    }
}

/// Parses a leaf payload into a value.
///
/// This is the extension point for storing serialized data: implement it for
/// your type and it becomes usable as a scalar destination or a container
/// element.
pub trait FromBytes: Sized + Send + 'static {
    /// Shown in type mismatch errors.
    const EXPECTED: &'static str = "a byte string";

    /// Whether error replies are acceptable input. Byte string destinations
    /// read error payloads as data; everything else surfaces them.
    const ERROR_AWARE: bool = true;

    /// Node kinds this type decodes from.
    fn accepts(data_type: DataType) -> bool {
        matches!(
            data_type,
            DataType::SimpleString
                | DataType::BlobString
                | DataType::SimpleError
                | DataType::BlobError
                | DataType::BigNumber
        )
    }

    fn from_bytes(value: &[u8]) -> Result<Self, AdapterError>;
}

/// Consumes the node stream of one response and produces a value.
pub trait Adapter: Send + 'static {
    type Output;

    /// Receive the untouched node stream: attribute frames and streamed
    /// string parts included, exactly as parsed.
    const RAW_NODES: bool = false;

    /// Accept a top-level error reply as data instead of failing the request
    /// with a server error.
    const ERROR_AWARE: bool = false;

    fn on_node(&mut self, index: ElementIndex, node: &Node) -> Result<(), AdapterError>;

    fn finish(self) -> Result<Self::Output, AdapterError>;
}

/// A destination type for [`Connection::exec`](crate::Connection::exec) and
/// [`Connection::read_push`](crate::Connection::read_push).
pub trait Response: Sized + Send + 'static {
    type Adapter: Adapter<Output = Self>;

    fn adapter() -> Self::Adapter;
}

/// What [`Feeder::cook`] decided about a node.
pub(crate) enum Cooked {
    /// Bookkeeping only, nothing reaches the adapter.
    Swallowed,
    /// Hand this node to the adapter at the given element ordinal.
    Emit { element: usize, node: Node },
}

/// Pre-processing shared by the reply and push paths.
///
/// For cooked (non-[`Adapter::RAW_NODES`]) destinations this discards
/// attribute subtrees without consuming an element slot, reassembles streamed
/// strings into a single synthetic blob string leaf, and assigns each
/// surviving node its top-level element ordinal.
#[derive(Default)]
pub(crate) struct Feeder {
    /// Remaining-children stack while discarding an attribute subtree.
    skip: Vec<usize>,
    /// Parent depth and accumulated payload of an open streamed string.
    streamed: Option<(usize, BytesMut)>,
    /// Top-level elements seen in the current reply.
    elements: usize,
}

impl Feeder {
    pub fn new() -> Feeder {
        Feeder::default()
    }

    pub fn cook(&mut self, raw: bool, node: &Node) -> Cooked {
        if raw {
            return Cooked::Emit {
                element: self.next_element(node.depth),
                node: node.clone(),
            };
        }

        if !self.skip.is_empty() {
            self.skip_step(node);
            return Cooked::Swallowed;
        }

        if let Some((depth, acc)) = self.streamed.as_mut() {
            debug_assert_eq!(node.data_type, DataType::StreamedStringPart);
            if !node.value.is_empty() {
                acc.extend_from_slice(&node.value);
                return Cooked::Swallowed;
            }
            // Terminator: deliver the whole string as one leaf.
            let (depth, acc) = (*depth, std::mem::take(acc));
            self.streamed = None;
            let node = Node {
                data_type: DataType::BlobString,
                aggregate_size: 1,
                depth,
                value: acc.freeze(),
            };
            return Cooked::Emit {
                element: self.next_element(node.depth),
                node,
            };
        }

        if node.data_type == DataType::Attribute {
            if node.aggregate_size > 0 {
                self.skip.push(node.aggregate_size);
            }
            return Cooked::Swallowed;
        }

        if node.aggregate_size == Node::STREAMED {
            self.streamed = Some((node.depth, BytesMut::new()));
            return Cooked::Swallowed;
        }

        Cooked::Emit {
            element: self.next_element(node.depth),
            node: node.clone(),
        }
    }

    fn next_element(&mut self, depth: usize) -> usize {
        match depth {
            0 => {
                self.elements = 0;
                0
            }
            1 => {
                let element = self.elements;
                self.elements += 1;
                element
            }
            _ => self.elements.saturating_sub(1),
        }
    }

    fn skip_step(&mut self, node: &Node) {
        match node.data_type {
            // Parts belong to their streamed parent, which holds one slot.
            DataType::StreamedStringPart if node.value.is_empty() => {
                self.skip.pop();
                self.pop_completed();
            }
            DataType::StreamedStringPart => {}
            // A nested attribute annotates the element that follows; it does
            // not fill a slot of its parent.
            DataType::Attribute => {
                if node.aggregate_size > 0 {
                    self.skip.push(node.aggregate_size);
                }
            }
            _ if node.aggregate_size == Node::STREAMED => {
                if let Some(top) = self.skip.last_mut() {
                    *top -= 1;
                }
                self.skip.push(Node::STREAMED);
            }
            _ => {
                if let Some(top) = self.skip.last_mut() {
                    *top -= 1;
                }
                if node.data_type.is_aggregate() && node.aggregate_size > 0 {
                    self.skip.push(node.aggregate_size);
                } else {
                    self.pop_completed();
                }
            }
        }
    }

    fn pop_completed(&mut self) {
        while self.skip.last() == Some(&0) {
            self.skip.pop();
        }
    }
}

/// Drive a push frame's nodes through a destination adapter.
pub(crate) fn adapt_frame<R: Response>(nodes: &[Node]) -> Result<R, AdapterError> {
    let mut feeder = Feeder::new();
    let mut adapter = R::adapter();
    for node in nodes {
        match feeder.cook(<R::Adapter as Adapter>::RAW_NODES, node) {
            Cooked::Swallowed => {}
            Cooked::Emit { element, node } => {
                adapter.on_node(ElementIndex::Push { element }, &node)?;
            }
        }
    }
    adapter.finish()
}
