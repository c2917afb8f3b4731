//! Request/reply messaging on top of the publish/subscribe transport.
//!
//! [`Dispatcher`] routes inbound requests to the discovery endpoints and
//! answers them through [`MessageService`], which also publishes revision
//! notifications for standing queries.

mod dispatcher;
mod endpoints;
mod publisher;

pub use dispatcher::{DispatchOutcome, Dispatcher, Endpoint, EndpointHandler};
pub use endpoints::{discovery_endpoints, TEST_REPLY_TYPE};
pub use publisher::{MessageService, QUERY_REPLY_TYPE};
