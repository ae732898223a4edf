//! Convenient imports for typical `qesydb` usage.
//!
//! ```ignore
//! use qesydb::prelude::*;
//! ```

pub use crate::{
    ConnectionProvider, DbConfig, Filter, GenericClient, Model, OrmError, OrmResult, Record,
    RowResult, TransactionHandle, Value,
};

#[cfg(feature = "pool")]
pub use crate::{PoolProvider, create_pool, spawn_maintenance};
