pub mod document;
pub mod error;
pub mod identity;
pub mod store;

pub use document::{ChangeEvent, DocPath, Document, FieldValue, Query, SortDirection, WriteMode, WriteOp};
pub use error::StoreError;
pub use identity::{FixedIdentity, Identity, IdentityProvider};
pub use store::{DocumentStore, Transaction};
