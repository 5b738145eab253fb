//! PostgreSQL backend over tokio-postgres.
//!
//! Transactions are opened lazily with `BEGIN` on the first statement after a commit
//! or rollback. Merge tables are emulated with table inheritance, so a parent reads
//! through to its attached partitions the same way.

use bytes::{Bytes, BytesMut};
use futures_util::SinkExt;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, CopyInSink, NoTls};

use crate::connection::{Connection, DbError};
use crate::pool::Connector;
use crate::sql::{CopyCommand, Dialect, Statement};
use crate::value::Value;

impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        let msg = e.as_db_error().map(|d| d.message().to_string()).unwrap_or_else(|| e.to_string());
        if e.code() == Some(&SqlState::UNDEFINED_TABLE) {
            DbError::RelationNotFound(msg)
        } else if e.is_closed() {
            DbError::Connection(msg)
        } else {
            DbError::Statement(msg)
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        // Text-typed columns take the display form of any scalar.
        if <&str as ToSql>::accepts(ty) {
            return self.to_string().as_str().to_sql(ty, out);
        }
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 { (*f as f32).to_sql(ty, out) } else { f.to_sql(ty, out) }
            }
            Value::Text(s) => s.as_str().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool { true }

    to_sql_checked!();
}

fn bind(values: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

pub struct PgConnection {
    client: Client,
    in_transaction: bool,
}

impl PgConnection {
    pub fn new(client: Client) -> Self { Self { client, in_transaction: false } }

    async fn begin(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn finish(&mut self, verb: &str) -> Result<(), DbError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client.batch_execute(verb).await?;
        Ok(())
    }
}

impl Connection for PgConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        self.begin().await?;
        let r = stmt.render(Dialect::Postgres);
        if let Statement::CreateFunction { .. } = stmt {
            // Function scripts may carry several statements and dollar-quoted bodies.
            self.client.batch_execute(&r.sql).await?;
            return Ok(0);
        }
        Ok(self.client.execute(r.sql.as_str(), &bind(&r.params)).await?)
    }

    async fn select(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        self.begin().await?;
        let r = stmt.render(Dialect::Postgres);
        Ok(self.client.query(r.sql.as_str(), &bind(&r.params)).await?.len() as u64)
    }

    async fn copy_in(&mut self, cmd: &CopyCommand) -> Result<u64, DbError> {
        self.begin().await?;
        let sink: CopyInSink<Bytes> = self.client.copy_in(cmd.header(Dialect::Postgres).as_str()).await?;
        futures_util::pin_mut!(sink);
        if cmd.count > 0 {
            let mut data = cmd.data.clone();
            data.push('\n');
            sink.send(Bytes::from(data)).await?;
        }
        Ok(sink.finish().await?)
    }

    async fn commit(&mut self) -> Result<(), DbError> { self.finish("COMMIT").await }

    async fn rollback(&mut self) -> Result<(), DbError> { self.finish("ROLLBACK").await }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

/// Opens tokio-postgres sessions from a parsed `Config`.
#[derive(Clone)]
pub struct PgConnector {
    config: Config,
}

impl PgConnector {
    pub fn new(config: Config) -> Self { Self { config } }

    pub fn from_dsn(dsn: &str) -> Result<Self, DbError> {
        let config: Config = dsn.parse().map_err(|e: tokio_postgres::Error| DbError::Connection(e.to_string()))?;
        Ok(Self { config })
    }
}

impl Connector for PgConnector {
    type Conn = PgConnection;

    async fn connect(&self) -> Result<PgConnection, DbError> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(|e| DbError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(target: "datastore::pool", error = %e, "postgres connection closed");
            }
        });
        Ok(PgConnection::new(client))
    }
}
