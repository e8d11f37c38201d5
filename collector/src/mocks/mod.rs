//! Mock collaborators for testing.

mod bus;
pub use bus::{channel, PublishError, Publisher, SubscribeError, Subscriber};
mod store;
pub use store::{Failing, Flaky, Gated, StoreError};
