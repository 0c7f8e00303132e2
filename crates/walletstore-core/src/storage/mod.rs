//! Contract for the flat key/value + prefix-listing store that wallets live in.

mod object_store;

pub use object_store::{
    ClientSettings, Connector, InMemoryObjectStore, ListPage, ObjectStore, ObjectStoreError,
    DEFAULT_REGION,
};
