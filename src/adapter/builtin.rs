use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::marker::PhantomData;

use bytes::Bytes;

use crate::adapter::{Adapter, AdapterError, ElementIndex, FromBytes, Response};
use crate::node::{DataType, Node};

// --- leaf parsers -----------------------------------------------------------

impl FromBytes for String {
    fn from_bytes(value: &[u8]) -> Result<Self, AdapterError> {
        String::from_utf8(value.to_vec())
            .map_err(|_| AdapterError::Parse("payload is not valid utf-8".to_string()))
    }
}

impl FromBytes for Bytes {
    fn from_bytes(value: &[u8]) -> Result<Self, AdapterError> {
        Ok(Bytes::copy_from_slice(value))
    }
}

impl FromBytes for Vec<u8> {
    fn from_bytes(value: &[u8]) -> Result<Self, AdapterError> {
        Ok(value.to_vec())
    }
}

macro_rules! from_bytes_int {
    ($($t:ty),*) => {$(
        impl FromBytes for $t {
            const EXPECTED: &'static str = "an integer";
            const ERROR_AWARE: bool = false;

            fn accepts(data_type: DataType) -> bool {
                matches!(data_type, DataType::Number | DataType::Boolean)
            }

            fn from_bytes(value: &[u8]) -> Result<Self, AdapterError> {
                // Booleans land on integer destinations as 0 and 1.
                match value {
                    b"t" => return Ok(1 as $t),
                    b"f" => return Ok(0 as $t),
                    _ => {}
                }
                std::str::from_utf8(value)
                    .ok()
                    .and_then(|digits| digits.parse::<$t>().ok())
                    .ok_or_else(|| {
                        AdapterError::Parse(format!(
                            "{:?} is not an integer",
                            String::from_utf8_lossy(value)
                        ))
                    })
            }
        }
    )*};
}

from_bytes_int!(i16, i32, i64, i128, isize, u16, u32, u64, u128, usize);

macro_rules! from_bytes_float {
    ($($t:ty),*) => {$(
        impl FromBytes for $t {
            const EXPECTED: &'static str = "a double";
            const ERROR_AWARE: bool = false;

            fn accepts(data_type: DataType) -> bool {
                matches!(data_type, DataType::Double | DataType::Number)
            }

            fn from_bytes(value: &[u8]) -> Result<Self, AdapterError> {
                std::str::from_utf8(value)
                    .ok()
                    .and_then(|digits| digits.parse::<$t>().ok())
                    .ok_or_else(|| {
                        AdapterError::Parse(format!(
                            "{:?} is not a double",
                            String::from_utf8_lossy(value)
                        ))
                    })
            }
        }
    )*};
}

from_bytes_float!(f32, f64);

impl FromBytes for bool {
    const EXPECTED: &'static str = "a boolean";
    const ERROR_AWARE: bool = false;

    fn accepts(data_type: DataType) -> bool {
        matches!(data_type, DataType::Boolean | DataType::Number)
    }

    fn from_bytes(value: &[u8]) -> Result<Self, AdapterError> {
        match value {
            b"t" | b"1" => Ok(true),
            b"f" | b"0" => Ok(false),
            other => Err(AdapterError::Parse(format!(
                "{:?} is not a boolean",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

// --- scalar destinations ----------------------------------------------------

pub struct ScalarAdapter<T> {
    value: Option<T>,
}

impl<T: FromBytes> Adapter for ScalarAdapter<T> {
    type Output = T;

    const ERROR_AWARE: bool = T::ERROR_AWARE;

    fn on_node(&mut self, _index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        if self.value.is_some() || !T::accepts(node.data_type) {
            return Err(AdapterError::incompatible(T::EXPECTED, node));
        }
        self.value = Some(T::from_bytes(&node.value)?);
        Ok(())
    }

    fn finish(self) -> Result<T, AdapterError> {
        self.value
            .ok_or(AdapterError::Incomplete("no value received"))
    }
}

macro_rules! scalar_response {
    ($($t:ty),*) => {$(
        impl Response for $t {
            type Adapter = ScalarAdapter<$t>;

            fn adapter() -> Self::Adapter {
                ScalarAdapter { value: None }
            }
        }
    )*};
}

scalar_response!(
    i16, i32, i64, i128, isize, u16, u32, u64, u128, usize, f32, f64, bool, String, Bytes
);

// --- optional ---------------------------------------------------------------

pub struct OptionAdapter<R: Response> {
    state: OptionState<R::Adapter>,
}

enum OptionState<A> {
    Empty,
    Null,
    Value(A),
}

impl<R: Response> Adapter for OptionAdapter<R> {
    type Output = Option<R>;

    const RAW_NODES: bool = <R::Adapter as Adapter>::RAW_NODES;
    const ERROR_AWARE: bool = <R::Adapter as Adapter>::ERROR_AWARE;

    fn on_node(&mut self, index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        match &mut self.state {
            OptionState::Empty if node.data_type == DataType::Null => {
                self.state = OptionState::Null;
                Ok(())
            }
            OptionState::Empty => {
                let mut adapter = R::adapter();
                adapter.on_node(index, node)?;
                self.state = OptionState::Value(adapter);
                Ok(())
            }
            OptionState::Value(adapter) => adapter.on_node(index, node),
            OptionState::Null => Err(AdapterError::incompatible("nothing after null", node)),
        }
    }

    fn finish(self) -> Result<Option<R>, AdapterError> {
        match self.state {
            OptionState::Empty | OptionState::Null => Ok(None),
            OptionState::Value(adapter) => adapter.finish().map(Some),
        }
    }
}

impl<R: Response> Response for Option<R> {
    type Adapter = OptionAdapter<R>;

    fn adapter() -> Self::Adapter {
        OptionAdapter {
            state: OptionState::Empty,
        }
    }
}

// --- flat sequences ---------------------------------------------------------

pub struct SeqAdapter<T, C> {
    out: C,
    _element: PhantomData<fn() -> T>,
}

fn seq_element<T: FromBytes>(node: &Node) -> Result<T, AdapterError> {
    match node.depth {
        0 => unreachable!("aggregate roots are handled before elements"),
        1 if T::accepts(node.data_type) => T::from_bytes(&node.value),
        _ => Err(AdapterError::incompatible(T::EXPECTED, node)),
    }
}

impl<T, C> Adapter for SeqAdapter<T, C>
where
    T: FromBytes,
    C: Default + Extend<T> + Send + 'static,
{
    type Output = C;

    fn on_node(&mut self, _index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        if node.depth == 0 {
            return match node.data_type {
                DataType::Array | DataType::Set | DataType::Push => Ok(()),
                _ => Err(AdapterError::incompatible("an array, set or push", node)),
            };
        }
        self.out.extend([seq_element::<T>(node)?]);
        Ok(())
    }

    fn finish(self) -> Result<C, AdapterError> {
        Ok(self.out)
    }
}

impl<T: FromBytes> Response for Vec<T> {
    type Adapter = SeqAdapter<T, Vec<T>>;

    fn adapter() -> Self::Adapter {
        SeqAdapter {
            out: Vec::new(),
            _element: PhantomData,
        }
    }
}

// --- sets -------------------------------------------------------------------

pub struct SetAdapter<T, C> {
    out: C,
    _element: PhantomData<fn() -> T>,
}

impl<T, C> Adapter for SetAdapter<T, C>
where
    T: FromBytes,
    C: Default + Extend<T> + Send + 'static,
{
    type Output = C;

    fn on_node(&mut self, _index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        if node.depth == 0 {
            return match node.data_type {
                DataType::Set => Ok(()),
                _ => Err(AdapterError::incompatible("a set", node)),
            };
        }
        self.out.extend([seq_element::<T>(node)?]);
        Ok(())
    }

    fn finish(self) -> Result<C, AdapterError> {
        Ok(self.out)
    }
}

impl<T> Response for HashSet<T>
where
    T: FromBytes + Eq + std::hash::Hash,
{
    type Adapter = SetAdapter<T, HashSet<T>>;

    fn adapter() -> Self::Adapter {
        SetAdapter {
            out: HashSet::new(),
            _element: PhantomData,
        }
    }
}

impl<T> Response for BTreeSet<T>
where
    T: FromBytes + Ord,
{
    type Adapter = SetAdapter<T, BTreeSet<T>>;

    fn adapter() -> Self::Adapter {
        SetAdapter {
            out: BTreeSet::new(),
            _element: PhantomData,
        }
    }
}

// --- key/value mappings -----------------------------------------------------

pub struct MapAdapter<K, V, M> {
    pending_key: Option<K>,
    out: M,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, M> Adapter for MapAdapter<K, V, M>
where
    K: FromBytes,
    V: FromBytes,
    M: Default + Extend<(K, V)> + Send + 'static,
{
    type Output = M;

    fn on_node(&mut self, _index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        if node.depth == 0 {
            return match node.data_type {
                DataType::Map => Ok(()),
                _ => Err(AdapterError::incompatible("a map", node)),
            };
        }
        match self.pending_key.take() {
            None => {
                self.pending_key = Some(seq_element::<K>(node)?);
            }
            Some(key) => {
                let value = seq_element::<V>(node)?;
                self.out.extend([(key, value)]);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<M, AdapterError> {
        if self.pending_key.is_some() {
            return Err(AdapterError::Incomplete("map key without a value"));
        }
        Ok(self.out)
    }
}

impl<K, V> Response for HashMap<K, V>
where
    K: FromBytes + Eq + std::hash::Hash,
    V: FromBytes,
{
    type Adapter = MapAdapter<K, V, HashMap<K, V>>;

    fn adapter() -> Self::Adapter {
        MapAdapter {
            pending_key: None,
            out: HashMap::new(),
            _value: PhantomData,
        }
    }
}

impl<K, V> Response for BTreeMap<K, V>
where
    K: FromBytes + Ord,
    V: FromBytes,
{
    type Adapter = MapAdapter<K, V, BTreeMap<K, V>>;

    fn adapter() -> Self::Adapter {
        MapAdapter {
            pending_key: None,
            out: BTreeMap::new(),
            _value: PhantomData,
        }
    }
}

// --- heterogeneous tuples ---------------------------------------------------

/// Destination for replies with per-position types: a transaction result, a
/// HELLO map, or one pipelined reply per tuple slot.
pub struct TupleAdapter<T> {
    adapters: T,
    shape: TupleShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TupleShape {
    Undecided,
    /// One aggregate reply; slots are its top-level elements.
    Single,
    /// One reply per slot.
    PerReply,
}

enum Routed {
    Header,
    Slot { slot: usize, node: Node },
}

impl<T> TupleAdapter<T> {
    fn route(
        &mut self,
        index: ElementIndex,
        node: &Node,
        arity: usize,
    ) -> Result<Routed, AdapterError> {
        let (command, element) = match index {
            ElementIndex::Reply { command, element } => (command, element),
            ElementIndex::Push { element } => (0, element),
        };

        if self.shape == TupleShape::Undecided {
            let single = command == 0
                && node.depth == 0
                && node.aggregate_size == arity
                && matches!(
                    node.data_type,
                    DataType::Array | DataType::Map | DataType::Set | DataType::Push
                );
            if single {
                self.shape = TupleShape::Single;
                return Ok(Routed::Header);
            }
            // Anything else is read as one reply per slot.
            self.shape = TupleShape::PerReply;
        }

        let (slot, node) = match self.shape {
            TupleShape::Single => {
                if node.depth == 0 {
                    return Err(AdapterError::incompatible(
                        "a single aggregate reply",
                        node,
                    ));
                }
                // Slots see their element as a standalone reply.
                let mut node = node.clone();
                node.depth -= 1;
                (element, node)
            }
            TupleShape::PerReply => (command, node.clone()),
            TupleShape::Undecided => unreachable!(),
        };

        if slot >= arity {
            return Err(AdapterError::IncompatibleNodeType {
                expected: "an aggregate matching the tuple arity",
                found: node.data_type,
            });
        }
        Ok(Routed::Slot { slot, node })
    }
}

macro_rules! tuple_response {
    ($($name:ident . $idx:tt),+ ; $len:expr) => {
        impl<$($name: Response),+> Response for ($($name,)+) {
            type Adapter = TupleAdapter<($($name::Adapter,)+)>;

            fn adapter() -> Self::Adapter {
                TupleAdapter {
                    adapters: ($($name::adapter(),)+),
                    shape: TupleShape::Undecided,
                }
            }
        }

        impl<$($name: Adapter),+> Adapter for TupleAdapter<($($name,)+)> {
            type Output = ($($name::Output,)+);

            fn on_node(&mut self, index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
                match self.route(index, node, $len)? {
                    Routed::Header => Ok(()),
                    Routed::Slot { slot, node } => match slot {
                        $($idx => self.adapters.$idx.on_node(index, &node),)+
                        _ => unreachable!(),
                    },
                }
            }

            fn finish(self) -> Result<Self::Output, AdapterError> {
                Ok(($(self.adapters.$idx.finish()?,)+))
            }
        }
    };
}

tuple_response!(A.0; 1);
tuple_response!(A.0, B.1; 2);
tuple_response!(A.0, B.1, C.2; 3);
tuple_response!(A.0, B.1, C.2, D.3; 4);
tuple_response!(A.0, B.1, C.2, D.3, E.4; 5);
tuple_response!(A.0, B.1, C.2, D.3, E.4, F.5; 6);
tuple_response!(A.0, B.1, C.2, D.3, E.4, F.5, G.6; 7);
tuple_response!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7; 8);

// --- generic nodes ----------------------------------------------------------

pub struct NodeAdapter {
    node: Option<Node>,
}

impl Adapter for NodeAdapter {
    type Output = Node;

    const ERROR_AWARE: bool = true;

    fn on_node(&mut self, _index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        if self.node.is_some() || node.is_aggregate() {
            return Err(AdapterError::incompatible("a single simple value", node));
        }
        self.node = Some(node.clone());
        Ok(())
    }

    fn finish(self) -> Result<Node, AdapterError> {
        self.node.ok_or(AdapterError::Incomplete("no node received"))
    }
}

impl Response for Node {
    type Adapter = NodeAdapter;

    fn adapter() -> Self::Adapter {
        NodeAdapter { node: None }
    }
}

/// Captures the full pre-order traversal of a response, attribute frames and
/// streamed string parts included.
pub struct NodesAdapter {
    nodes: Vec<Node>,
}

impl Adapter for NodesAdapter {
    type Output = Vec<Node>;

    const RAW_NODES: bool = true;
    const ERROR_AWARE: bool = true;

    fn on_node(&mut self, _index: ElementIndex, node: &Node) -> Result<(), AdapterError> {
        self.nodes.push(node.clone());
        Ok(())
    }

    fn finish(self) -> Result<Vec<Node>, AdapterError> {
        Ok(self.nodes)
    }
}

impl Response for Vec<Node> {
    type Adapter = NodesAdapter;

    fn adapter() -> Self::Adapter {
        NodesAdapter { nodes: Vec::new() }
    }
}

// --- ignore -----------------------------------------------------------------

/// Consumes a response without storing anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ignore;

pub struct IgnoreAdapter<T> {
    _out: PhantomData<fn() -> T>,
}

impl<T: Default + Send + 'static> Adapter for IgnoreAdapter<T> {
    type Output = T;

    const RAW_NODES: bool = true;
    const ERROR_AWARE: bool = true;

    fn on_node(&mut self, _index: ElementIndex, _node: &Node) -> Result<(), AdapterError> {
        Ok(())
    }

    fn finish(self) -> Result<T, AdapterError> {
        Ok(T::default())
    }
}

impl Response for Ignore {
    type Adapter = IgnoreAdapter<Ignore>;

    fn adapter() -> Self::Adapter {
        IgnoreAdapter { _out: PhantomData }
    }
}

impl Response for () {
    type Adapter = IgnoreAdapter<()>;

    fn adapter() -> Self::Adapter {
        IgnoreAdapter { _out: PhantomData }
    }
}
