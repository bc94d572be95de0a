//! # evbus-core
//!
//! Local half of the evbus event bus: a topic registry whose handlers are
//! ordinary closures with arbitrary parameter lists.
//!
//! ### Key Submodules:
//! - `value`: serializable payload values and their conversions
//! - `args`: argument lists, output references (`Reply` / `Out`)
//! - `handler`: the `Handler` trait family and the type-erased `Callback`
//! - `bus`: the `EventBus` registry
//!
//! ```
//! # tokio_test::block_on(async {
//! use evbus_core::{args, EventBus, Out, Reply};
//!
//! let bus = EventBus::new();
//! bus.subscribe("event", |a: i64| println!("[sub] {a}")).unwrap();
//! bus.publish("event", args![10]).await;
//!
//! bus.subscribe("query", |result: Out<i64>| result.set(10)).unwrap();
//! let result = Reply::<i64>::new();
//! bus.publish("query", args![result.out()]).await;
//! assert_eq!(result.get(), Some(10));
//! # });
//! ```

pub mod args;
pub mod bus;
pub mod error;
pub mod handler;
pub mod value;

pub mod prelude {
    pub use crate::args::*;
    pub use crate::bus::*;
    pub use crate::error::*;
    pub use crate::handler::*;
    pub use crate::value::*;
}

pub use args::{Arg, Args, IntoArg, Out, OutSlot, Reply};
pub use bus::{EventBus, HandlerFailure, PublishReport, SubscriptionId};
pub use error::{ArgError, DispatchError, RegistrationError};
pub use handler::{Callback, FnCallback, Handler, Origin, ParamKind, Signature};
pub use value::{FromValue, IntoValue, Json, Value, ValueKind};
