mod common;

use rusty_mini_query::Cell;
use serde_json::json;

async fn count(db: &rusty_mini_query::Database, sql: &str) -> anyhow::Result<i64> {
    let out = db.execute(sql).await?;
    let n = common::column(&out, "n")?;
    n.first()
        .and_then(Cell::as_i64)
        .ok_or_else(|| anyhow::anyhow!("no count in {out:?}"))
}

#[tokio::test]
async fn test_join_cardinalities() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM table1, table2").await?, 9);
    assert_eq!(
        count(&db, "SELECT COUNT(*) AS n FROM table1 JOIN table2 ON table1.id = table2.parent").await?,
        2
    );
    // Every table1 row survives; id 3 has no children.
    assert_eq!(
        count(&db, "SELECT COUNT(*) AS n FROM table1 LEFT JOIN table2 ON table1.id = table2.parent").await?,
        3
    );
    // Every table2 row survives; id 1 has no parent.
    assert_eq!(
        count(&db, "SELECT COUNT(*) AS n FROM table1 RIGHT JOIN table2 ON table1.id = table2.parent").await?,
        3
    );
    assert_eq!(
        count(&db, "SELECT COUNT(*) AS n FROM table1 FULL OUTER JOIN table2 ON table1.id = table2.parent").await?,
        9
    );
    Ok(())
}

#[tokio::test]
async fn test_outer_join_null_sides() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "SELECT t1.id AS a, t2.id AS b FROM table1 t1 LEFT JOIN table2 t2 ON t1.id = t2.parent",
        )
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([{"a": 1, "b": 2}, {"a": 2, "b": 3}, {"a": 3, "b": null}])
    );

    let out = db
        .execute(
            "SELECT t1.id AS a, t2.id AS b FROM table1 t1 RIGHT JOIN table2 t2 ON t1.id = t2.parent ORDER BY b",
        )
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([{"a": null, "b": 1}, {"a": 1, "b": 2}, {"a": 2, "b": 3}])
    );

    let out = db
        .execute("SELECT id, age FROM table2 JOIN table3 USING (id, age)")
        .await?;
    assert!(common::rows(&out)?.as_array().is_some_and(|r| r.is_empty()));
    Ok(())
}

#[tokio::test]
async fn test_group_by_rollup() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute("SELECT lname, COUNT(*) AS n, SUM(age) AS total FROM table3 GROUP BY lname WITH ROLLUP")
        .await?;
    assert_eq!(
        common::column(&out, "lname")?,
        vec![Cell::from("x"), Cell::from("y"), Cell::Null]
    );
    assert_eq!(common::column(&out, "n")?, common::ints(&[2, 1, 3]));
    let totals: Vec<Option<f64>> = common::column(&out, "total")?
        .iter()
        .map(Cell::as_f64)
        .collect();
    assert_eq!(totals, vec![Some(21.0), Some(12.0), Some(33.0)]);

    let out = db
        .execute("SELECT lname, COUNT(*) AS n FROM table3 GROUP BY lname HAVING n > 1")
        .await?;
    assert_eq!(common::rows(&out)?, json!([{"lname": "x", "n": 2}]));
    Ok(())
}

#[tokio::test]
async fn test_rollup_over_two_columns() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "SELECT lname, age, COUNT(*) AS n, GROUPING(lname, age) AS g \
             FROM table3 GROUP BY lname, age WITH ROLLUP",
        )
        .await?;
    // Sub-totals follow their children; the grand total comes last.
    assert_eq!(
        common::column(&out, "lname")?,
        vec![
            Cell::from("x"),
            Cell::from("x"),
            Cell::from("x"),
            Cell::from("y"),
            Cell::from("y"),
            Cell::Null,
        ]
    );
    assert_eq!(
        common::column(&out, "age")?,
        vec![
            Cell::Int(10),
            Cell::Int(11),
            Cell::Null,
            Cell::Int(12),
            Cell::Null,
            Cell::Null,
        ]
    );
    assert_eq!(common::column(&out, "n")?, common::ints(&[1, 1, 2, 1, 1, 3]));
    // Position of the first rolled-up argument.
    assert_eq!(common::column(&out, "g")?, common::ints(&[0, 0, 2, 0, 2, 1]));
    Ok(())
}

#[tokio::test]
async fn test_grouping_marks_summary_rows() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute("SELECT lname, GROUPING(lname) AS g FROM table3 GROUP BY lname WITH ROLLUP")
        .await?;
    assert_eq!(common::column(&out, "g")?, common::ints(&[0, 0, 1]));

    let out = db
        .execute("SELECT lname, GROUPING(lname) AS g FROM table3 GROUP BY lname")
        .await?;
    assert_eq!(common::column(&out, "g")?, common::ints(&[0, 0]));
    Ok(())
}

#[tokio::test]
async fn test_rollup_rows_null_mixed_expressions() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "SELECT lname, CONCAT(lname, ':', COUNT(*)) AS tag \
             FROM table3 GROUP BY lname WITH ROLLUP",
        )
        .await?;
    assert_eq!(
        common::column(&out, "tag")?,
        vec![Cell::from("x:2"), Cell::from("y:1"), Cell::Null]
    );
    Ok(())
}

#[tokio::test]
async fn test_aggregates_over_empty_input() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM table1 WHERE id > 100").await?, 0);

    let out = db
        .execute("SELECT age, COUNT(*) AS n FROM table1 WHERE id > 100 GROUP BY age")
        .await?;
    assert_eq!(common::rows(&out)?, json!([]));
    Ok(())
}

#[tokio::test]
async fn test_order_by_is_stable() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db.execute("SELECT id FROM table3 ORDER BY lname DESC").await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[3, 1, 2]));

    // NULL sorts first ascending, last descending.
    let out = db.execute("SELECT id FROM table2 ORDER BY parent").await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[1, 2, 3]));
    let out = db.execute("SELECT id FROM table2 ORDER BY parent DESC").await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[3, 2, 1]));

    let out = db
        .execute("SELECT lname, id FROM table3 ORDER BY 1 DESC, id DESC")
        .await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[3, 2, 1]));
    Ok(())
}

#[tokio::test]
async fn test_distinct_and_paging() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db.execute("SELECT DISTINCT lname FROM table3").await?;
    assert_eq!(common::rows(&out)?, json!([{"lname": "x"}, {"lname": "y"}]));

    let out = db
        .execute("SELECT id FROM table1 ORDER BY id LIMIT 1 OFFSET 1")
        .await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[2]));

    let out = db.execute("SELECT id FROM table1 ORDER BY id LIMIT 1, 5").await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[2, 3]));
    Ok(())
}

#[tokio::test]
async fn test_distinct_keeps_first_seen_rows() -> anyhow::Result<()> {
    let db = common::fixture().await?;
    db.execute("INSERT INTO table3 (id, age, lname) VALUES (4, 13, 'z'), (5, 14, 'x'), (6, 15, 'z')")
        .await?;

    let out = db.execute("SELECT DISTINCT lname FROM table3").await?;
    assert_eq!(
        common::column(&out, "lname")?,
        vec![Cell::from("x"), Cell::from("y"), Cell::from("z")]
    );

    let out = db
        .execute("SELECT DISTINCT lname, age > 12 AS old FROM table3")
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([
            {"lname": "x", "old": 0},
            {"lname": "y", "old": 0},
            {"lname": "z", "old": 1},
            {"lname": "x", "old": 1},
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_windows() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "SELECT id, ROW_NUMBER() OVER (PARTITION BY lname ORDER BY age DESC) AS rn \
             FROM table3 ORDER BY id",
        )
        .await?;
    assert_eq!(common::column(&out, "rn")?, common::ints(&[2, 1, 1]));

    let out = db
        .execute(
            "SELECT id, COUNT(*) OVER w AS n FROM table3 WINDOW w AS (PARTITION BY lname) ORDER BY id",
        )
        .await?;
    assert_eq!(common::column(&out, "n")?, common::ints(&[2, 2, 1]));
    Ok(())
}

#[tokio::test]
async fn test_derived_tables_and_expressions() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute("SELECT d.id FROM (SELECT id FROM table1 WHERE age > 35) d ORDER BY d.id")
        .await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[2, 3]));

    let out = db
        .execute(
            "SELECT CONCAT(lname, '-', id) AS tag, \
             CASE WHEN age > 10 THEN 'old' ELSE 'young' END AS band \
             FROM table3 WHERE lname LIKE 'x%' ORDER BY id",
        )
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([
            {"tag": "x-1", "band": "young"},
            {"tag": "x-2", "band": "old"},
        ])
    );

    let out = db.execute("SELECT 1 + 2 AS three").await?;
    assert_eq!(common::column(&out, "three")?, common::ints(&[3]));
    Ok(())
}

#[tokio::test]
async fn test_scalar_functions() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "SELECT UPPER(lname) AS u, LENGTH(lname) AS len, COALESCE(NULL, age) AS c, \
             IFNULL(NULL, 'none') AS i, IF(age > 10, 'old', 'young') AS f, ABS(-3) AS a, \
             ROUND(2.567, 1) AS r, FIND_IN_SET('b', 'a,b,c') AS pos, \
             CONCAT_WS('-', lname, NULL, id) AS ws \
             FROM table3 WHERE id = 2",
        )
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([{
            "u": "X",
            "len": 1,
            "c": 11,
            "i": "none",
            "f": "old",
            "a": 3,
            "r": 2.6,
            "pos": 2,
            "ws": "x-2",
        }])
    );

    let out = db.execute("SELECT ISNULL(parent) AS missing FROM table2").await?;
    assert_eq!(common::column(&out, "missing")?, common::ints(&[1, 0, 0]));
    Ok(())
}

#[tokio::test]
async fn test_json_functions() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute(
            "SELECT JSON_EXTRACT('{\"a\": {\"b\": [5, 6]}}', '$.a.b[1]') AS v, \
             JSON_OBJECT('id', id) AS o, JSON_ARRAY(id, lname) AS arr, \
             JSON_MERGE('{\"k\": 1}', '{\"k\": 2}') AS m \
             FROM table3 WHERE id = 3",
        )
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([{
            "v": 6,
            "o": r#"{"id":3}"#,
            "arr": r#"[3,"y"]"#,
            "m": r#"{"k":[1,2]}"#,
        }])
    );

    let out = db
        .execute("SELECT JSON_EXTRACT('{\"a\": 1}', '$.b') AS v")
        .await?;
    assert_eq!(common::column(&out, "v")?, vec![Cell::Null]);
    Ok(())
}
