mod common;

use rusty_mini_query::{Affected, Cell};
use serde_json::json;

#[tokio::test]
async fn test_delete_using() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute("DELETE FROM t1 USING table1 t1 WHERE t1.age < 60")
        .await?;
    assert_eq!(out.to_json(), json!({"t1": [1, 2]}));

    let out = db.execute("SELECT id FROM table1").await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[3]));

    // Nothing left to match.
    let out = db.execute("DELETE FROM table1 WHERE age < 60").await?;
    assert_eq!(out.affected("table1"), Some(&Affected::Keys(vec![])));
    Ok(())
}

#[tokio::test]
async fn test_delete_joined_targets() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "DELETE t2 FROM table2 t2 JOIN table1 t1 ON t2.parent = t1.id WHERE t1.age > 35",
        )
        .await?;
    assert_eq!(out.to_json(), json!({"t2": [3]}));

    let out = db.execute("SELECT id FROM table2").await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[1, 2]));
    Ok(())
}

#[tokio::test]
async fn test_multi_table_update() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "UPDATE table2 t2, table3 t3 SET t2.lname = 100, t3.lname = 500 \
             WHERE t2.age = 20 AND t3.age = 10",
        )
        .await?;
    assert_eq!(out.to_json(), json!({"t2": [2], "t3": [1]}));

    let out = db.execute("SELECT id, lname FROM table2").await?;
    assert_eq!(
        common::column(&out, "lname")?,
        vec![Cell::from("a"), Cell::from("100"), Cell::from("c")]
    );
    let out = db.execute("SELECT lname FROM table3 WHERE id = 1").await?;
    assert_eq!(common::column(&out, "lname")?, vec![Cell::from("500")]);
    Ok(())
}

#[tokio::test]
async fn test_update_applies_once_per_row() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    // t1 row 1 pairs with all three table3 rows.
    let out = db
        .execute("UPDATE table1 t1, table3 t3 SET t1.age = t1.age + 1 WHERE t1.id = 1")
        .await?;
    assert_eq!(out.to_json(), json!({"t1": [1]}));

    let out = db.execute("SELECT age FROM table1 WHERE id = 1").await?;
    assert_eq!(common::column(&out, "age")?, common::ints(&[34]));
    Ok(())
}

#[tokio::test]
async fn test_single_table_update() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let err = db
        .execute("UPDATE table1 SET age = age + 1, id = id WHERE id = 1")
        .await
        .err();
    assert!(err.is_some(), "primary key assignment must be rejected");

    let out = db
        .execute("UPDATE table1 SET age = age * 2 WHERE age >= 40")
        .await?;
    assert_eq!(out.to_json(), json!({"table1": [2, 3]}));

    let out = db.execute("SELECT age FROM table1").await?;
    assert_eq!(common::column(&out, "age")?, common::ints(&[33, 80, 120]));
    Ok(())
}

#[tokio::test]
async fn test_insert_duplicates() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let err = db
        .execute("INSERT INTO table1 (id, age) VALUES (1, 99)")
        .await
        .err();
    assert!(
        err.as_ref().is_some_and(|e| e.is_duplicate_key()),
        "{err:?}"
    );

    let out = db
        .execute("INSERT IGNORE INTO table1 (id, age) VALUES (1, 99), (4, 70)")
        .await?;
    assert_eq!(out.to_json(), json!({"table1": [4]}));

    let out = db
        .execute(
            "INSERT INTO table1 (id, age) VALUES (2, 50) \
             ON DUPLICATE KEY UPDATE age = VALUES(age) + 1",
        )
        .await?;
    assert_eq!(out.to_json(), json!({"table1": [2]}));

    let out = db.execute("REPLACE INTO table1 (id, age) VALUES (3, 7)").await?;
    assert_eq!(out.to_json(), json!({"table1": [3]}));

    let out = db.execute("SELECT id, age FROM table1 ORDER BY id").await?;
    assert_eq!(
        common::rows(&out)?,
        json!([
            {"id": 1, "age": 33},
            {"id": 2, "age": 51},
            {"id": 3, "age": 7},
            {"id": 4, "age": 70},
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_insert_select_and_params() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute_with(
            "INSERT INTO table3 (id, age, lname) SELECT id + 10, age, lname FROM table2 WHERE age > ?",
            &[Cell::Int(21)],
        )
        .await?;
    assert_eq!(out.to_json(), json!({"table3": [11, 13]}));

    let out = db
        .execute_with(
            "SELECT id FROM table3 WHERE age BETWEEN ? AND ? ORDER BY id",
            &[Cell::Int(11), Cell::Int(30)],
        )
        .await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[2, 3, 11, 13]));
    Ok(())
}
