pub mod event;
pub mod id;
pub mod keys;

pub use event::{Event, EventError, EventTemplate, AUTH_KIND};
pub use keys::{KeyError, PublicKey, SecretKey};
