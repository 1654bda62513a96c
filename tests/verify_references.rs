mod common;

use rusty_mini_query::{Cell, EngineError};
use serde_json::json;

#[tokio::test]
async fn test_outgoing_reference() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db.execute("SELECT t2.id, parent~>id FROM table2 t2").await?;
    assert_eq!(
        common::rows(&out)?,
        json!([
            {"id": 1, "parent~>id": null},
            {"id": 2, "parent~>id": 1},
            {"id": 3, "parent~>id": 2},
        ])
    );

    let out = db.execute("SELECT id, parent->age FROM table2").await?;
    assert_eq!(
        common::column(&out, "parent->age")?,
        vec![Cell::Null, Cell::Int(33), Cell::Int(40)]
    );
    Ok(())
}

#[tokio::test]
async fn test_incoming_reference() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute("SELECT id, id<-table2->age FROM table1 ORDER BY id")
        .await?;
    assert_eq!(
        common::rows(&out)?,
        json!([
            {"id": 1, "id<-table2->age": 20},
            {"id": 2, "id<-table2->age": 30},
            {"id": 3, "id<-table2->age": null},
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_reference_in_where_and_order() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let out = db
        .execute("SELECT id FROM table2 WHERE parent->age > 35")
        .await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[3]));

    let out = db
        .execute("SELECT id, parent->age AS page FROM table2 ORDER BY parent->age DESC")
        .await?;
    assert_eq!(common::column(&out, "id")?, common::ints(&[3, 2, 1]));
    Ok(())
}

#[tokio::test]
async fn test_reference_errors() -> anyhow::Result<()> {
    let db = common::fixture().await?;

    let err = db.execute("SELECT age->id FROM table2").await.err();
    assert!(matches!(err, Some(EngineError::UndefinedForeignKey(_))), "{err:?}");

    let err = db.execute("SELECT id<-nope->age FROM table1").await.err();
    assert!(matches!(err, Some(EngineError::ImpliedTableNotDefined(_))), "{err:?}");
    Ok(())
}
