// ABOUTME: Reactive primitives shared by every tether crate.
// ABOUTME: Defines the observable Cell, the zero-payload Event, subscriptions, and value codecs.

pub mod cell;
pub mod codec;
pub mod event;
pub mod subscription;

pub use cell::{Cell, WeakCell};
pub use codec::{Codec, CodecError, FnCodec, JsonCodec};
pub use event::Event;
pub use subscription::Subscription;
