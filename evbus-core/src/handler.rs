//! ## evbus-core::handler
//! **Handlers with arbitrary parameter lists**
//!
//! Any closure `Fn(P1, .., Pn) -> R` with `n <= 8` is a [`Handler`] when every
//! parameter implements [`Param`] and `R` implements [`HandlerResult`]. The
//! closure's [`Signature`] is computed once at subscribe time and validated
//! there; each publish then decodes the argument list against it.
//!
//! The registry stores handlers type-erased as [`Callback`] trait objects.
//! Forwarding handlers of the network layer implement [`Callback`] directly.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use async_trait::async_trait;

use crate::args::{Arg, Args, Out};
use crate::error::{ArgError, DispatchError, RegistrationError};
use crate::value::{FromValue, IntoValue, ValueKind};

/// Kind of one declared handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Value(ValueKind),
    Output,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Value(kind) => kind.fmt(f),
            ParamKind::Output => f.write_str("out"),
        }
    }
}

/// Parameter list descriptor of a registered callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Fixed(Vec<ParamKind>),
    /// Accepts any argument list (forwarding handlers).
    Variadic,
}

impl Signature {
    pub fn outputs(&self) -> usize {
        match self {
            Signature::Fixed(params) => params.iter().filter(|p| **p == ParamKind::Output).count(),
            Signature::Variadic => 0,
        }
    }

    pub fn has_output(&self) -> bool {
        self.outputs() > 0
    }

    /// Registration-time shape check.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        match self.outputs() {
            0 | 1 => Ok(()),
            n => Err(RegistrationError::MultipleOutputs(n)),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Variadic => f.write_str("(..)"),
            Signature::Fixed(params) => {
                f.write_str("(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    p.fmt(f)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Where a dispatch originated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Local,
    /// Replayed from a `PushEvent`; `trail` lists the node identities that
    /// already dispatched this event.
    Forwarded { trail: Vec<String> },
}

impl Origin {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Origin::Forwarded { .. })
    }

    pub fn trail(&self) -> &[String] {
        match self {
            Origin::Local => &[],
            Origin::Forwarded { trail } => trail,
        }
    }
}

/// A handler parameter type.
pub trait Param: Sized {
    fn kind() -> ParamKind;

    fn extract(arg: &Arg) -> Result<Self, ArgError>;
}

impl<T: FromValue> Param for T {
    fn kind() -> ParamKind {
        ParamKind::Value(T::KIND)
    }

    fn extract(arg: &Arg) -> Result<Self, ArgError> {
        match arg {
            Arg::Value(value) => T::from_value(value.clone()),
            Arg::Out(_) => Err(ArgError::UnexpectedOutput),
        }
    }
}

impl<T: IntoValue> Param for Out<T> {
    fn kind() -> ParamKind {
        ParamKind::Output
    }

    fn extract(arg: &Arg) -> Result<Self, ArgError> {
        match arg {
            Arg::Out(slot) => Ok(Out::from_slot(slot.clone())),
            Arg::Value(_) => Err(ArgError::ExpectedOutput),
        }
    }
}

/// Return type of a handler.
pub trait HandlerResult {
    fn into_outcome(self) -> Result<(), DispatchError>;
}

impl HandlerResult for () {
    fn into_outcome(self) -> Result<(), DispatchError> {
        Ok(())
    }
}

impl<E: fmt::Display> HandlerResult for Result<(), E> {
    fn into_outcome(self) -> Result<(), DispatchError> {
        self.map_err(|e| DispatchError::Handler(e.to_string()))
    }
}

/// A callable with a declared parameter list. `Marker` disambiguates the
/// per-arity impls and is inferred.
pub trait Handler<Marker>: Send + Sync + 'static {
    fn signature() -> Signature;

    fn call(&self, args: &Args) -> Result<(), DispatchError>;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_handler {
    ($($p:ident),*) => {
        impl<F, R, $($p,)*> Handler<fn($($p,)*) -> R> for F
        where
            F: Fn($($p,)*) -> R + Send + Sync + 'static,
            R: HandlerResult,
            $($p: Param,)*
        {
            fn signature() -> Signature {
                Signature::Fixed(vec![$(<$p as Param>::kind(),)*])
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn call(&self, args: &Args) -> Result<(), DispatchError> {
                let expected = count!($($p)*);
                if args.len() != expected {
                    return Err(DispatchError::Arity {
                        expected,
                        found: args.len(),
                    });
                }
                let slice = args.as_slice();
                let mut index = 0usize;
                $(
                    let $p = <$p as Param>::extract(&slice[index])
                        .map_err(|source| DispatchError::Argument { index, source })?;
                    index += 1;
                )*
                (self)($($p,)*).into_outcome()
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Type-erased callback stored in the registry.
#[async_trait]
pub trait Callback: Send + Sync {
    fn signature(&self) -> &Signature;

    async fn invoke(&self, args: &Args, origin: &Origin) -> Result<(), DispatchError>;
}

/// [`Callback`] adapter around a typed [`Handler`].
pub struct FnCallback<H, M> {
    handler: H,
    signature: Signature,
    _marker: PhantomData<fn() -> M>,
}

impl<H, M> FnCallback<H, M>
where
    H: Handler<M>,
{
    pub fn new(handler: H) -> Result<Self, RegistrationError> {
        let signature = H::signature();
        signature.validate()?;
        Ok(Self {
            handler,
            signature,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<H, M> Callback for FnCallback<H, M>
where
    H: Handler<M>,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, args: &Args, origin: &Origin) -> Result<(), DispatchError> {
        if origin.is_forwarded() && self.signature.has_output() {
            return Err(DispatchError::UnsupportedPattern);
        }
        match catch_unwind(AssertUnwindSafe(|| self.handler.call(args))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(DispatchError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
