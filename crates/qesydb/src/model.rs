//! The query model: a reusable builder bound to one provider.
//!
//! Setters accumulate a [`QueryState`]. A terminal operation (`select`,
//! `insert`, `update`, `delete`, `query`, `exec_raw`, ...) takes that state
//! out of the model, compiles it into a fresh [`Plan`] and only then talks to
//! the database, so the model is back at its defaults whether the call
//! succeeds or fails. All mutation goes through `&mut self`; one model serves
//! one operation at a time.
//!
//! ```ignore
//! let mut m = provider.model();
//! let rows = m.table("users").fields("id, name").eq("status", "active").select().await?;
//! let id = m.table("users").insert_value("name", "alice").insert("id").await?;
//! ```

use crate::binder::{Binder, Plan};
use crate::clause::{
    Limit, batch_insert_clause, field_list, group_by_clause, insert_clause, limit_clause,
    order_by_clause, update_clause, where_clause,
};
use crate::client::GenericClient;
use crate::condition::{CondValue, Condition, Filter};
use crate::decode::{ResultDecoder, RowResult, index_rows};
use crate::error::{OrmError, OrmResult};
use crate::provider::{ConnectionProvider, TransactionHandle};
use crate::record::Record;
use crate::value::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Longest SQL text written to a log event.
const MAX_LOGGED_SQL: usize = 2048;

/// Everything a model accumulates for the next statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub condition: Condition,
    pub insert: Record,
    pub insert_rows: Vec<Record>,
    pub update: Record,
    pub fields: String,
    pub table: String,
    pub index: String,
    pub limit: Option<Limit>,
    pub sort: String,
    pub group_by: String,
    pub debug: bool,
}

impl QueryState {
    fn require_table(&self) -> OrmResult<&str> {
        match self.table.trim() {
            "" => Err(OrmError::validation("table is not set")),
            t => Ok(t),
        }
    }

    /// `SELECT fields FROM table [WHERE] [GROUP BY] [ORDER BY] [LIMIT]`
    pub fn select_plan(&self) -> OrmResult<Plan> {
        let table = self.require_table()?;
        let mut binder = Binder::new();
        let sql = format!(
            "SELECT {} FROM {table}{}{}{}{}",
            field_list(&self.fields),
            where_clause(&self.condition, &mut binder),
            group_by_clause(&self.group_by),
            order_by_clause(&self.sort),
            limit_clause(self.limit),
        );
        Ok(Plan::new(sql, binder))
    }

    /// `INSERT INTO table (...) VALUES (...) RETURNING pk`
    pub fn insert_plan(&self, primary_key: &str) -> OrmResult<Plan> {
        let table = self.require_table()?;
        if primary_key.trim().is_empty() {
            return Err(OrmError::validation("insert requires a primary key column to return"));
        }
        let mut binder = Binder::new();
        let values = insert_clause(&self.insert, &mut binder)?;
        let sql = format!("INSERT INTO {table} {values} RETURNING {primary_key}");
        Ok(Plan::new(sql, binder))
    }

    /// Multi-row insert. An empty `primary_key` omits the `RETURNING` clause.
    pub fn insert_batch_plan(&self, primary_key: &str) -> OrmResult<Plan> {
        let table = self.require_table()?;
        let mut binder = Binder::new();
        let values = batch_insert_clause(&self.insert_rows, &mut binder)?;
        let sql = match primary_key.trim() {
            "" => format!("INSERT INTO {table} {values}"),
            pk => format!("INSERT INTO {table} {values} RETURNING {pk}"),
        };
        Ok(Plan::new(sql, binder))
    }

    /// `UPDATE table SET ... [WHERE]`; SET placeholders come first.
    pub fn update_plan(&self) -> OrmResult<Plan> {
        let table = self.require_table()?;
        let mut binder = Binder::new();
        let sets = update_clause(&self.update, &mut binder)?;
        let sql = format!(
            "UPDATE {table} SET {sets}{}",
            where_clause(&self.condition, &mut binder)
        );
        Ok(Plan::new(sql, binder))
    }

    /// `DELETE FROM table [WHERE]`
    pub fn delete_plan(&self) -> OrmResult<Plan> {
        let table = self.require_table()?;
        let mut binder = Binder::new();
        let sql = format!(
            "DELETE FROM {table}{}",
            where_clause(&self.condition, &mut binder)
        );
        Ok(Plan::new(sql, binder))
    }
}

/// Where a statement runs: straight on the provider or inside the open transaction.
enum Route<'a, P: ConnectionProvider> {
    Provider(&'a P),
    Transaction(&'a P::Transaction),
}

impl<P: ConnectionProvider> GenericClient for Route<'_, P> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        match self {
            Route::Provider(p) => p.query(sql, params).await,
            Route::Transaction(tx) => tx.query(sql, params).await,
        }
    }

    async fn query_opt(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Option<Row>> {
        match self {
            Route::Provider(p) => p.query_opt(sql, params).await,
            Route::Transaction(tx) => tx.query_opt(sql, params).await,
        }
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        match self {
            Route::Provider(p) => p.execute(sql, params).await,
            Route::Transaction(tx) => tx.execute(sql, params).await,
        }
    }

    async fn batch_execute(&self, sql: &str) -> OrmResult<()> {
        match self {
            Route::Provider(p) => p.batch_execute(sql).await,
            Route::Transaction(tx) => tx.batch_execute(sql).await,
        }
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        match self {
            Route::Provider(p) => p.cancel_token(),
            Route::Transaction(tx) => tx.cancel_token(),
        }
    }
}

/// Fluent query builder bound to a [`ConnectionProvider`].
pub struct Model<'p, P: ConnectionProvider> {
    provider: &'p P,
    state: QueryState,
    tx: Option<P::Transaction>,
    timeout: Option<Duration>,
    decoder: ResultDecoder,
}

impl<P: ConnectionProvider> std::fmt::Debug for Model<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("state", &self.state)
            .field("in_transaction", &self.tx.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<'p, P: ConnectionProvider> Model<'p, P> {
    pub fn new(provider: &'p P) -> Self {
        Self {
            provider,
            state: Self::fresh_state(provider),
            tx: None,
            timeout: None,
            decoder: ResultDecoder::default(),
        }
    }

    fn fresh_state(provider: &P) -> QueryState {
        QueryState {
            debug: provider.debug_sql(),
            ..QueryState::default()
        }
    }

    // ==================== builder ====================

    pub fn table(&mut self, table: impl Into<String>) -> &mut Self {
        self.state.table = table.into();
        self
    }

    /// Select list; `*` when never set.
    pub fn fields(&mut self, fields: impl Into<String>) -> &mut Self {
        self.state.fields = fields.into();
        self
    }

    /// Column [`select_index`](Self::select_index) keys rows by.
    pub fn index(&mut self, column: impl Into<String>) -> &mut Self {
        self.state.index = column.into();
        self
    }

    /// Raw `ORDER BY` text.
    pub fn sort(&mut self, sort: impl Into<String>) -> &mut Self {
        self.state.sort = sort.into();
        self
    }

    /// Raw `GROUP BY` text.
    pub fn group_by(&mut self, group_by: impl Into<String>) -> &mut Self {
        self.state.group_by = group_by.into();
        self
    }

    pub fn limit(&mut self, offset: u64, count: u64) -> &mut Self {
        self.state.limit = Some(Limit::new(offset, count));
        self
    }

    /// Log the next statement's SQL and values at `debug` level.
    pub fn debug(&mut self, enabled: bool) -> &mut Self {
        self.state.debug = enabled;
        self
    }

    /// Deadline for every statement this model runs. Survives resets.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(&mut self) -> &mut Self {
        self.timeout = None;
        self
    }

    /// Decoder used for result rows. Survives resets.
    pub fn decoder(&mut self, decoder: ResultDecoder) -> &mut Self {
        self.decoder = decoder;
        self
    }

    /// Replace the condition.
    pub fn condition(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.state.condition = condition.into();
        self
    }

    /// Replace the condition with a caller-written fragment. Nothing is bound.
    pub fn where_raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.condition(Condition::raw(sql))
    }

    /// Replace the condition with a flat map; see [`Condition::from_map`].
    pub fn where_map<I, K, V>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.condition(Condition::from_map(entries))
    }

    /// Replace the condition with a map of values or lists; see [`Condition::from_typed`].
    pub fn where_typed<I, K, V>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CondValue>,
    {
        self.condition(Condition::from_typed(entries))
    }

    /// AND another filter onto the condition.
    pub fn filter(&mut self, filter: Filter) -> &mut Self {
        self.state.condition.push(filter);
        self
    }

    pub fn eq(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn in_list<I>(&mut self, column: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.filter(Filter::in_list(column, values))
    }

    /// Set one column of the row [`insert`](Self::insert) writes.
    pub fn insert_value(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.state.insert.set(column, value);
        self
    }

    pub fn set_insert(&mut self, record: Record) -> &mut Self {
        self.state.insert = record;
        self
    }

    /// Rows for [`insert_batch`](Self::insert_batch).
    pub fn insert_rows(&mut self, rows: Vec<Record>) -> &mut Self {
        self.state.insert_rows = rows;
        self
    }

    /// Set one column for [`update`](Self::update).
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.state.update.set(column, value);
        self
    }

    pub fn set_update(&mut self, record: Record) -> &mut Self {
        self.state.update = record;
        self
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Reset the builder and drop any open transaction.
    ///
    /// A dropped transaction is never committed.
    pub fn clean(&mut self) {
        self.state = Self::fresh_state(self.provider);
        self.tx = None;
    }

    // ==================== plans ====================

    pub fn plan_select(&self) -> OrmResult<Plan> {
        self.state.select_plan()
    }

    pub fn plan_insert(&self, primary_key: &str) -> OrmResult<Plan> {
        self.state.insert_plan(primary_key)
    }

    pub fn plan_insert_batch(&self, primary_key: &str) -> OrmResult<Plan> {
        self.state.insert_batch_plan(primary_key)
    }

    pub fn plan_update(&self) -> OrmResult<Plan> {
        self.state.update_plan()
    }

    pub fn plan_delete(&self) -> OrmResult<Plan> {
        self.state.delete_plan()
    }

    // ==================== terminal operations ====================

    /// Run the accumulated SELECT.
    ///
    /// A row that fails to decode stops decoding; the error is an
    /// [`OrmError::PartialResult`] holding the rows decoded before it.
    pub async fn select(&mut self) -> OrmResult<Vec<RowResult>> {
        let state = self.take_state();
        let plan = state.select_plan()?;
        let rows = self.fetch_all(&plan, state.debug).await?;
        self.decoder.decode_rows(&rows)
    }

    /// Run the SELECT with `LIMIT 1`; `None` when nothing matched.
    pub async fn select_one(&mut self) -> OrmResult<Option<RowResult>> {
        self.state.limit = Some(Limit::new(0, 1));
        Ok(self.select().await?.into_iter().next())
    }

    /// Run the SELECT and key the rows by the [`index`](Self::index) column.
    ///
    /// Rows with an empty key are dropped; for duplicate keys the later row wins.
    pub async fn select_index(&mut self) -> OrmResult<HashMap<String, RowResult>> {
        let column = self.state.index.clone();
        if column.trim().is_empty() {
            self.take_state();
            return Err(OrmError::validation("select_index requires an index column"));
        }
        let rows = self.select().await?;
        Ok(index_rows(rows, &column))
    }

    /// Run caller-written SQL and decode its rows.
    pub async fn query(&mut self, sql: &str, params: Vec<Value>) -> OrmResult<Vec<RowResult>> {
        let state = self.take_state();
        let plan = Plan {
            sql: sql.to_string(),
            params,
        };
        let rows = self.fetch_all(&plan, state.debug).await?;
        self.decoder.decode_rows(&rows)
    }

    /// Insert one row and return the text of its `primary_key` column.
    pub async fn insert(&mut self, primary_key: &str) -> OrmResult<String> {
        let state = self.take_state();
        let plan = state.insert_plan(primary_key)?;
        let route = self.route();
        self.trace(&plan, state.debug);
        let params = plan.param_refs();
        let row = self
            .observe(&plan, self.guarded(&route, route.query_opt(&plan.sql, &params)))
            .await?
            .ok_or_else(|| OrmError::not_found("insert returned no row"))?;
        self.decoder.decode_text(&row, 0)
    }

    /// Insert every row in one statement.
    ///
    /// Returns the `primary_key` text of each inserted row in the order the
    /// server reports them, or nothing when `primary_key` is empty.
    pub async fn insert_batch(&mut self, primary_key: &str) -> OrmResult<Vec<String>> {
        let state = self.take_state();
        let plan = state.insert_batch_plan(primary_key)?;
        if primary_key.trim().is_empty() {
            self.run_execute(&plan, state.debug).await?;
            return Ok(Vec::new());
        }
        let rows = self.fetch_all(&plan, state.debug).await?;
        rows.iter()
            .map(|row| self.decoder.decode_text(row, 0))
            .collect()
    }

    /// Run the UPDATE; returns the affected row count.
    pub async fn update(&mut self) -> OrmResult<u64> {
        let state = self.take_state();
        let plan = state.update_plan()?;
        self.run_execute(&plan, state.debug).await
    }

    /// Run the DELETE; returns the affected row count.
    pub async fn delete(&mut self) -> OrmResult<u64> {
        let state = self.take_state();
        let plan = state.delete_plan()?;
        self.run_execute(&plan, state.debug).await
    }

    /// Execute caller-written SQL; returns the affected row count.
    pub async fn exec_raw(&mut self, sql: &str, params: Vec<Value>) -> OrmResult<u64> {
        let state = self.take_state();
        let plan = Plan {
            sql: sql.to_string(),
            params,
        };
        self.run_execute(&plan, state.debug).await
    }

    // ==================== transactions ====================

    /// Open a transaction; every statement runs inside it until
    /// `commit`, `rollback` or `clean`.
    pub async fn begin(&mut self) -> OrmResult<()> {
        if self.tx.is_some() {
            return Err(OrmError::validation("a transaction is already open"));
        }
        self.tx = Some(self.provider.begin().await?);
        Ok(())
    }

    pub async fn commit(&mut self) -> OrmResult<()> {
        self.take_tx()?.commit().await
    }

    pub async fn rollback(&mut self) -> OrmResult<()> {
        self.take_tx()?.rollback().await
    }

    fn take_tx(&mut self) -> OrmResult<P::Transaction> {
        self.tx
            .take()
            .ok_or_else(|| OrmError::validation("no open transaction"))
    }

    // ==================== execution ====================

    fn take_state(&mut self) -> QueryState {
        let fresh = Self::fresh_state(self.provider);
        std::mem::replace(&mut self.state, fresh)
    }

    fn route(&self) -> Route<'_, P> {
        match &self.tx {
            Some(tx) => Route::Transaction(tx),
            None => Route::Provider(self.provider),
        }
    }

    async fn fetch_all(&self, plan: &Plan, debug: bool) -> OrmResult<Vec<Row>> {
        let route = self.route();
        self.trace(plan, debug);
        let params = plan.param_refs();
        self.observe(plan, self.guarded(&route, route.query(&plan.sql, &params)))
            .await
    }

    async fn run_execute(&self, plan: &Plan, debug: bool) -> OrmResult<u64> {
        let route = self.route();
        self.trace(plan, debug);
        let params = plan.param_refs();
        self.observe(plan, self.guarded(&route, route.execute(&plan.sql, &params)))
            .await
    }

    /// Apply the model's timeout, cancelling the statement server-side on expiry.
    async fn guarded<T, F>(&self, route: &Route<'_, P>, future: F) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>>,
    {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, future).await.map_err(|_| {
                if let Some(cancel_token) = route.cancel_token() {
                    tokio::spawn(async move {
                        let _ = cancel_token.cancel_query(tokio_postgres::NoTls).await;
                    });
                }
                OrmError::Timeout(timeout)
            })?,
            None => future.await,
        }
    }

    /// Log a failure when the provider asks for it. The error is always returned.
    async fn observe<T, F>(&self, plan: &Plan, future: F) -> OrmResult<T>
    where
        F: Future<Output = OrmResult<T>>,
    {
        let result = future.await;
        if let Err(e) = &result
            && self.provider.log_errors()
        {
            tracing::warn!(
                target: "qesydb.sql",
                sql = %truncate_sql(&plan.sql),
                error = %e,
                "statement failed"
            );
        }
        result
    }

    fn trace(&self, plan: &Plan, debug: bool) {
        if debug {
            tracing::debug!(
                target: "qesydb.sql",
                in_transaction = self.tx.is_some(),
                param_count = plan.params.len(),
                sql = %truncate_sql(&plan.sql),
                params = ?plan.params,
            );
        }
    }
}

fn truncate_sql(sql: &str) -> std::borrow::Cow<'_, str> {
    if sql.len() <= MAX_LOGGED_SQL {
        return sql.into();
    }
    let mut end = MAX_LOGGED_SQL;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &sql[..end]).into()
}

#[cfg(test)]
mod tests;
