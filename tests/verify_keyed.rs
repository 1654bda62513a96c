mod common;

use rusty_mini_query::{Cell, Database};
use serde_json::json;

#[tokio::test]
async fn test_keyed_store_persists_tables() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let db = Database::open_keyed(dir.path())?;
        common::seed(&db).await?;

        let out = db
            .execute("UPDATE table1 SET age = 41 WHERE id = 2")
            .await?;
        assert_eq!(out.to_json(), json!({"table1": [2]}));
        let out = db.execute("DELETE FROM table2 WHERE id = 1").await?;
        assert_eq!(out.to_json(), json!({"table2": [1]}));
    }

    let db = Database::open_keyed(dir.path())?;
    assert_eq!(db.table_names(), vec!["table1", "table2", "table3"]);

    let out = db.execute("SELECT id, age FROM table1 ORDER BY id").await?;
    assert_eq!(common::column(&out, "age")?, common::ints(&[33, 41, 60]));

    let out = db
        .execute("SELECT t2.id, parent->age FROM table2 t2 ORDER BY t2.id")
        .await?;
    assert_eq!(
        common::column(&out, "parent->age")?,
        vec![Cell::Int(33), Cell::Int(41)]
    );
    Ok(())
}
