#![allow(dead_code)]

use rusty_mini_query::{Cell, ColumnDef, Database, Output, SqlType, TableDef};

pub fn table1() -> TableDef {
    TableDef::new("table1")
        .column(ColumnDef::new("id", SqlType::Int).not_null())
        .column(ColumnDef::new("age", SqlType::Int))
        .primary_key("id")
}

pub fn table2() -> TableDef {
    TableDef::new("table2")
        .column(ColumnDef::new("id", SqlType::Int).not_null())
        .column(ColumnDef::new("parent", SqlType::Int).references("table1", "id"))
        .column(ColumnDef::new("age", SqlType::Int))
        .column(ColumnDef::new("lname", SqlType::Text))
        .primary_key("id")
}

pub fn table3() -> TableDef {
    TableDef::new("table3")
        .column(ColumnDef::new("id", SqlType::Int).not_null())
        .column(ColumnDef::new("age", SqlType::Int))
        .column(ColumnDef::new("lname", SqlType::Text))
        .primary_key("id")
}

pub async fn seed(db: &Database) -> anyhow::Result<()> {
    db.create_table(table1())?;
    db.create_table(table2())?;
    db.create_table(table3())?;
    db.execute("INSERT INTO table1 (id, age) VALUES (1, 33), (2, 40), (3, 60)")
        .await?;
    db.execute(
        "INSERT INTO table2 (id, parent, age, lname) VALUES \
         (1, NULL, 22, 'a'), (2, 1, 20, 'b'), (3, 2, 30, 'c')",
    )
    .await?;
    db.execute("INSERT INTO table3 (id, age, lname) VALUES (1, 10, 'x'), (2, 11, 'x'), (3, 12, 'y')")
        .await?;
    Ok(())
}

/// In-memory database holding the three scenario tables.
pub async fn fixture() -> anyhow::Result<Database> {
    let db = Database::new();
    seed(&db).await?;
    Ok(db)
}

pub fn rows(out: &Output) -> anyhow::Result<serde_json::Value> {
    anyhow::ensure!(out.rows().is_some(), "expected a row set, got {out:?}");
    Ok(out.to_json())
}

/// One output column, in row order.
pub fn column(out: &Output, name: &str) -> anyhow::Result<Vec<Cell>> {
    let rows = out
        .rows()
        .ok_or_else(|| anyhow::anyhow!("expected a row set, got {out:?}"))?;
    rows.iter()
        .map(|r| {
            r.get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing field {name} in {r:?}"))
        })
        .collect()
}

pub fn ints(values: &[i64]) -> Vec<Cell> {
    values.iter().copied().map(Cell::Int).collect()
}
