//! ## evbus-core::args
//! **Published argument lists and output references**
//!
//! An [`Args`] list is what `publish` hands to every handler of a topic. Most
//! entries are plain values; at most one is usually an output reference created
//! from a caller-owned [`Reply`], through which a handler declaring an [`Out`]
//! parameter writes a result back (the local query pattern).

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::{FromValue, IntoValue, Value};

/// Shared storage behind an output reference.
#[derive(Clone, Default)]
pub struct OutSlot(Arc<Mutex<Option<Value>>>);

impl OutSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: Value) {
        *self.0.lock() = Some(value);
    }

    pub fn peek(&self) -> Option<Value> {
        self.0.lock().clone()
    }

    pub fn take(&self) -> Option<Value> {
        self.0.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl fmt::Debug for OutSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutSlot").field(&*self.0.lock()).finish()
    }
}

/// One published argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Out(OutSlot),
}

impl Arg {
    pub fn is_output(&self) -> bool {
        matches!(self, Arg::Out(_))
    }
}

/// Ordered argument list of a single publish call.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, arg: impl IntoArg) {
        self.0.push(arg.into_arg());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Arg] {
        &self.0
    }

    pub fn has_output(&self) -> bool {
        self.0.iter().any(Arg::is_output)
    }

    /// Plain values of the list, or `None` if it holds an output reference.
    pub fn to_values(&self) -> Option<Vec<Value>> {
        self.0
            .iter()
            .map(|arg| match arg {
                Arg::Value(v) => Some(v.clone()),
                Arg::Out(_) => None,
            })
            .collect()
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into_iter().map(Arg::Value).collect())
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args)
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a Arg;
    type IntoIter = std::slice::Iter<'a, Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Anything that can appear in an [`args!`](crate::args!) list.
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

impl<T: IntoValue> IntoArg for T {
    fn into_arg(self) -> Arg {
        Arg::Value(self.into_value())
    }
}

impl IntoArg for Arg {
    fn into_arg(self) -> Arg {
        self
    }
}

/// Builds an [`Args`] list from heterogeneous expressions.
///
/// ```
/// use evbus_core::{args, Reply};
/// let reply = Reply::<i64>::new();
/// let args = args![10, "ten", reply.out()];
/// assert_eq!(args.len(), 3);
/// assert!(args.has_output());
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::args::Args::new()
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::args::Args::from(::std::vec![$($crate::args::IntoArg::into_arg($arg)),+])
    };
}

/// Caller-owned storage for the result of a local query.
pub struct Reply<T> {
    slot: OutSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for Reply<T> {
    fn default() -> Self {
        Self {
            slot: OutSlot::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").field("slot", &self.slot).finish()
    }
}

impl<T: FromValue> Reply<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output reference to pass to `publish`.
    pub fn out(&self) -> Arg {
        Arg::Out(self.slot.clone())
    }

    /// The written value, if any handler wrote one of type `T`.
    pub fn get(&self) -> Option<T> {
        self.slot.peek().and_then(|v| T::from_value(v).ok())
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_set()
    }
}

/// Handler-side view of an output reference.
pub struct Out<T> {
    slot: OutSlot,
    _marker: PhantomData<fn(T)>,
}

impl<T> fmt::Debug for Out<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Out").field("slot", &self.slot).finish()
    }
}

impl<T: IntoValue> Out<T> {
    pub(crate) fn from_slot(slot: OutSlot) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn set(&self, value: T) {
        self.slot.set(value.into_value());
    }
}
