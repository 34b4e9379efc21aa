//! Open5GSUser subscriber sync
//!
//! Keeps each `Open5GSUser` mirrored as a record in the subscriber datastore
//! of the Open5GS deployment it references, with a finalizer guaranteeing
//! the record is removed when the user is deleted.

#![deny(missing_docs)]

pub mod controller;
pub mod record;
pub mod resolver;
pub mod store;

pub use controller::{error_policy, reconcile, KubeUserClient, UserClient, UserContext};
pub use resolver::{DatastoreResolver, KubeDatastoreResolver};
pub use store::{MongoStoreConnector, StoreConnector, SubscriberStore};
