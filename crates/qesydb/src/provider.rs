//! Connection providers and transaction handles.
//!
//! A [`ConnectionProvider`] is what a [`Model`](crate::Model) executes
//! against when no transaction is open. [`ConnectionProvider::begin`] hands
//! out a [`TransactionHandle`] that pins one connection until it is committed
//! or rolled back.

use crate::client::GenericClient;
use crate::error::OrmResult;
use crate::model::Model;
use std::future::Future;

/// A connection that is inside `BEGIN`.
pub trait TransactionHandle: GenericClient {
    fn commit(self) -> impl Future<Output = OrmResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = OrmResult<()>> + Send;
}

/// Source of connections for models.
pub trait ConnectionProvider: GenericClient {
    type Transaction: TransactionHandle;

    /// Open a transaction on a dedicated connection.
    fn begin(&self) -> impl Future<Output = OrmResult<Self::Transaction>> + Send;

    /// Whether new models log their SQL by default.
    fn debug_sql(&self) -> bool {
        false
    }

    /// Whether failing statements are logged.
    fn log_errors(&self) -> bool {
        false
    }

    /// Start a fresh query model bound to this provider.
    fn model(&self) -> Model<'_, Self>
    where
        Self: Sized,
    {
        Model::new(self)
    }
}

#[cfg(feature = "pool")]
pub use self::pooled::{PoolProvider, PoolTransaction};

#[cfg(feature = "pool")]
mod pooled {
    use super::{ConnectionProvider, TransactionHandle};
    use crate::client::GenericClient;
    use crate::config::DbConfig;
    use crate::error::{OrmError, OrmResult};
    use deadpool_postgres::Pool;
    use tokio_postgres::Row;
    use tokio_postgres::types::ToSql;

    /// [`ConnectionProvider`] backed by a deadpool pool.
    ///
    /// Each statement checks a connection out for the duration of that call.
    #[derive(Clone)]
    pub struct PoolProvider {
        pool: Pool,
        debug: bool,
        log_errors: bool,
    }

    impl std::fmt::Debug for PoolProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PoolProvider")
                .field("status", &self.pool.status())
                .field("debug", &self.debug)
                .field("log_errors", &self.log_errors)
                .finish()
        }
    }

    impl PoolProvider {
        pub fn new(pool: Pool) -> Self {
            Self {
                pool,
                debug: false,
                log_errors: false,
            }
        }

        /// Build the pool described by `config` and take its logging toggles.
        pub fn from_config(config: &DbConfig) -> OrmResult<Self> {
            let pool = crate::pool::create_pool(config)?;
            Ok(Self::new(pool)
                .with_debug(config.debug)
                .with_log_errors(config.log_errors))
        }

        pub fn with_debug(mut self, debug: bool) -> Self {
            self.debug = debug;
            self
        }

        pub fn with_log_errors(mut self, log_errors: bool) -> Self {
            self.log_errors = log_errors;
            self
        }

        pub fn pool(&self) -> &Pool {
            &self.pool
        }
    }

    impl GenericClient for PoolProvider {
        async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
            let call = InFlight::checkout(&self.pool).await?;
            let result = GenericClient::query(call.client()?, sql, params).await;
            call.finish(result)
        }

        async fn query_opt(
            &self,
            sql: &str,
            params: &[&(dyn ToSql + Sync)],
        ) -> OrmResult<Option<Row>> {
            let call = InFlight::checkout(&self.pool).await?;
            let result = GenericClient::query_opt(call.client()?, sql, params).await;
            call.finish(result)
        }

        async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
            let call = InFlight::checkout(&self.pool).await?;
            let result = GenericClient::execute(call.client()?, sql, params).await;
            call.finish(result)
        }

        async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
            let call = InFlight::checkout(&self.pool).await?;
            let result = GenericClient::batch_execute(call.client()?, sql).await;
            call.finish(result)
        }
    }

    impl ConnectionProvider for PoolProvider {
        type Transaction = PoolTransaction;

        async fn begin(&self) -> OrmResult<PoolTransaction> {
            let call = InFlight::checkout(&self.pool).await?;
            let begun = GenericClient::batch_execute(call.client()?, "BEGIN").await;
            if let Err(e) = begun {
                return call.finish(Err(e));
            }
            Ok(PoolTransaction {
                client: Some(call.into_client()?),
            })
        }

        fn debug_sql(&self) -> bool {
            self.debug
        }

        fn log_errors(&self) -> bool {
            self.log_errors
        }
    }

    /// A checked-out connection running one statement.
    ///
    /// If the call is dropped before it finishes (a model timeout, a cancelled
    /// task), the statement is cancelled on the server and the connection is
    /// detached instead of going back to the pool busy.
    struct InFlight {
        client: Option<deadpool_postgres::Client>,
        done: bool,
    }

    impl InFlight {
        async fn checkout(pool: &Pool) -> OrmResult<Self> {
            Ok(Self {
                client: Some(pool.get().await?),
                done: false,
            })
        }

        fn client(&self) -> OrmResult<&deadpool_postgres::Client> {
            self.client
                .as_ref()
                .ok_or_else(|| OrmError::Other("connection already released".to_string()))
        }

        /// Hand the connection back to the pool.
        fn finish<T>(mut self, result: T) -> T {
            self.done = true;
            result
        }

        fn into_client(mut self) -> OrmResult<deadpool_postgres::Client> {
            self.done = true;
            self.client
                .take()
                .ok_or_else(|| OrmError::Other("connection already released".to_string()))
        }
    }

    impl Drop for InFlight {
        fn drop(&mut self) {
            if self.done {
                return;
            }
            let Some(client) = self.client.take() else {
                return;
            };
            if let (Some(token), Ok(runtime)) = (
                GenericClient::cancel_token(&client),
                tokio::runtime::Handle::try_current(),
            ) {
                runtime.spawn(async move {
                    let _ = token.cancel_query(tokio_postgres::NoTls).await;
                });
            }
            tracing::debug!(
                target: "qesydb.sql",
                "statement abandoned; cancelling it and closing its connection"
            );
            drop(deadpool_postgres::Client::take(client));
        }
    }

    /// A pooled connection with an open transaction.
    ///
    /// Dropping it without `commit`/`rollback` detaches the connection from
    /// the pool and closes it, which makes the server roll the transaction
    /// back. An open transaction is never handed to another caller.
    pub struct PoolTransaction {
        client: Option<deadpool_postgres::Client>,
    }

    impl PoolTransaction {
        fn client(&self) -> OrmResult<&deadpool_postgres::Client> {
            self.client
                .as_ref()
                .ok_or_else(|| OrmError::Other("transaction already finished".to_string()))
        }

        async fn finish(mut self, statement: &str) -> OrmResult<()> {
            let Some(client) = self.client.take() else {
                return Ok(());
            };
            match GenericClient::batch_execute(&client, statement).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    // The session state is unknown, keep it out of the pool.
                    let _ = deadpool_postgres::Client::take(client);
                    Err(e)
                }
            }
        }
    }

    impl GenericClient for PoolTransaction {
        async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
            GenericClient::query(self.client()?, sql, params).await
        }

        async fn query_opt(
            &self,
            sql: &str,
            params: &[&(dyn ToSql + Sync)],
        ) -> OrmResult<Option<Row>> {
            GenericClient::query_opt(self.client()?, sql, params).await
        }

        async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
            GenericClient::execute(self.client()?, sql, params).await
        }

        async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
            GenericClient::batch_execute(self.client()?, sql).await
        }

        fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
            self.client
                .as_ref()
                .and_then(|client| GenericClient::cancel_token(client))
        }
    }

    impl TransactionHandle for PoolTransaction {
        async fn commit(self) -> OrmResult<()> {
            self.finish("COMMIT").await
        }

        async fn rollback(self) -> OrmResult<()> {
            self.finish("ROLLBACK").await
        }
    }

    impl Drop for PoolTransaction {
        fn drop(&mut self) {
            if let Some(client) = self.client.take() {
                tracing::warn!(
                    target: "qesydb.sql",
                    "transaction dropped while open; closing its connection"
                );
                drop(deadpool_postgres::Client::take(client));
            }
        }
    }
}
