//! View and function management. Neither is recorded in the catalog.

use tracing::info;

use crate::connection::Connection;
use crate::ddl::{self, commit, exec, query};
use crate::error::DatastoreResult;
use crate::sql::Statement;
use crate::value::Value;

/// Drop `name` if present, then create it from `query_text`. Each step commits.
pub async fn create_or_replace_view<C: Connection>(conn: &mut C, name: &str, query_text: &str, params: &[Value]) -> DatastoreResult<bool> {
    let create = Statement::create_view(name, query_text, params)?;
    let replaced = ddl::table_exists(conn, name).await?;
    if replaced {
        exec(conn, &Statement::drop_view(name)?).await?;
        commit(conn).await?;
    }
    exec(conn, &create).await?;
    commit(conn).await?;
    info!(target: "datastore::views", "CREATE VIEW {} (replaced={})", name, replaced);
    Ok(replaced)
}

pub async fn check_if_function_exists<C: Connection>(conn: &mut C, name: &str) -> DatastoreResult<bool> {
    let found = query(conn, &Statement::function_exists(name)?).await? > 0;
    // read-only, but close the transaction the lookup opened
    commit(conn).await?;
    Ok(found)
}

/// Drop the function if it exists, then run the caller's `CREATE FUNCTION` script.
pub async fn create_or_replace_function<C: Connection>(conn: &mut C, name: &str, script: &str) -> DatastoreResult<bool> {
    let create = Statement::create_function(name, script)?;
    let replaced = check_if_function_exists(conn, name).await?;
    if replaced {
        exec(conn, &Statement::drop_function(name)?).await?;
    }
    exec(conn, &create).await?;
    commit(conn).await?;
    info!(target: "datastore::views", "CREATE FUNCTION {} (replaced={})", name, replaced);
    Ok(replaced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryDatabase;
    use crate::model::ColumnDef;

    #[tokio::test]
    async fn view_replace_drops_first() {
        let db = MemoryDatabase::new();
        let mut c = db.connect();
        c.execute(&Statement::create_table("T", &[ColumnDef::new("ID", "INTEGER")], false).unwrap()).await.unwrap();
        c.commit().await.unwrap();
        assert!(!create_or_replace_view(&mut c, "V", "SELECT * FROM T", &[]).await.unwrap());
        db.clear_log();
        assert!(create_or_replace_view(&mut c, "V", "SELECT ID FROM T", &[]).await.unwrap());
        assert_eq!(
            db.statement_log(),
            vec!["SELECT 1 FROM V LIMIT 1", "DROP VIEW V", "COMMIT", "CREATE VIEW V AS SELECT ID FROM T", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn function_lifecycle() {
        let db = MemoryDatabase::new();
        let mut c = db.connect();
        assert!(!check_if_function_exists(&mut c, "times_two").await.unwrap());
        let script = "CREATE FUNCTION times_two(x INT) RETURNS INT LANGUAGE PYTHON { return x * 2 };";
        assert!(!create_or_replace_function(&mut c, "times_two", script).await.unwrap());
        assert!(check_if_function_exists(&mut c, "TIMES_TWO").await.unwrap());
        assert!(create_or_replace_function(&mut c, "times_two", script).await.unwrap());
        assert!(db.has_function("times_two"));
    }
}
