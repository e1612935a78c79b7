//! Integration tests for model definitions and record CRUD
//!
//! Every test uses its own connection id since the registry is process-wide.

use dbx::{
    Connection, ConnectionConfig, DbxError, Direction, FieldType, Model, ModelField, Op, Query,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

async fn shop(id: &str) -> anyhow::Result<(Connection, Model, Model)> {
    let conn = Connection::new(id, ConnectionConfig::default())?;
    conn.connect().await?;

    let user = conn
        .define(
            "user",
            vec![
                ModelField::new("name", FieldType::String).size(32),
                ModelField::new("age", FieldType::Uint).size(3),
                ModelField::new("role", FieldType::Flag)
                    .flag_value(0, "member")
                    .flag_value(1, "admin"),
            ],
        )
        .await?;
    let order = conn
        .define(
            "order",
            vec![
                ModelField::foreign_key("user", "user", "id"),
                ModelField::new("total", FieldType::Int),
                ModelField::new("note", FieldType::Text).nullable(),
            ],
        )
        .await?;
    conn.sync_models().await?;

    Ok((conn, user, order))
}

#[tokio::test]
async fn test_create_and_get() -> anyhow::Result<()> {
    let (conn, user, _) = shop("crud-create-get").await?;

    let ann = user.create_json(json!({"name": "ann", "age": 31})).await?;
    assert_eq!(ann.id, 1);
    assert!(ann.exists);
    assert!(!ann.in_cache);
    assert_eq!(ann.date_created, ann.date_updated);
    assert_eq!(ann.get("role"), Some(json!(0)));

    let bob = user.create_json(json!({"name": "bob"})).await?;
    assert_eq!(bob.id, 2);

    let fetched = user.get(1, false).await?.expect("record 1");
    assert_eq!(fetched, ann);
    assert!(user.get(99, false).await?.is_none());

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_create_validation() -> anyhow::Result<()> {
    let (conn, user, order) = shop("crud-validation").await?;

    assert!(matches!(
        user.create_json(json!({"name": "x", "email": "x@y"})).await,
        Err(DbxError::UnknownField { .. })
    ));
    assert!(matches!(
        user.create_json(json!({"age": 1000})).await,
        Err(DbxError::Validation { .. })
    ));
    assert!(matches!(
        user.create_json(json!({"role": 2})).await,
        Err(DbxError::Validation { .. })
    ));
    assert!(matches!(
        user.create_json(json!({"id": 5})).await,
        Err(DbxError::ReservedField(_))
    ));

    // Foreign keys default to null and are required
    assert_err!(order.create_json(json!({"total": 10})).await);
    let placed = assert_ok!(order.create_json(json!({"user": 1, "total": -5, "note": null})).await);
    assert_eq!(placed.get("note"), Some(json!(null)));

    assert_eq!(user.count(&Query::new(), false).await?, 0);

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_save_updates_and_delete() -> anyhow::Result<()> {
    let (conn, user, _) = shop("crud-save-delete").await?;

    let mut record = user.new_record();
    record.set("name", "cid")?;
    record.save(&user).await?;
    assert!(record.exists);
    assert_eq!(record.id, 1);

    record.set("age", 40)?;
    record.save(&user).await?;
    assert!(record.date_updated >= record.date_created);
    assert_eq!(user.get(1, false).await?.unwrap().get("age"), Some(json!(40)));
    assert_eq!(user.count(&Query::new(), false).await?, 1);

    record.set("age", -1)?;
    assert!(matches!(record.save(&user).await, Err(DbxError::Validation { .. })));
    record.set("age", 41)?;

    let mut stale = record.clone();
    record.delete(&user).await?;
    assert!(!record.exists);
    assert!(user.get(1, false).await?.is_none());

    assert!(matches!(record.delete(&user).await, Err(DbxError::RecordNotFound { .. })));
    assert!(matches!(stale.save(&user).await, Err(DbxError::RecordNotFound { .. })));
    assert!(!stale.exists);

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_get_all_and_search() -> anyhow::Result<()> {
    let (conn, user, _) = shop("crud-search").await?;
    for (name, age) in [("ann", 31), ("bob", 25), ("cid", 40), ("dee", 25)] {
        user.create_json(json!({"name": name, "age": age})).await?;
    }

    let some = user.get_all(&[3, 9, 1], false).await?;
    let ids: Vec<u64> = some.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 1]);

    let young = user
        .search(
            &Query::new()
                .eq("age", 25)
                .order_by("name", Direction::Desc),
            false,
        )
        .await?;
    let names: Vec<_> = young.iter().map(|r| r.get("name").unwrap()).collect();
    assert_eq!(names, vec![json!("dee"), json!("bob")]);

    let older = Query::new().filter("age", Op::Gt, 30).limit(1);
    assert_eq!(user.search(&older, false).await?.len(), 1);
    assert_eq!(user.count(&older, false).await?, 2);

    assert!(matches!(
        user.search(&Query::new().eq("email", "x"), false).await,
        Err(DbxError::UnknownField { .. })
    ));

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_operations_require_connect() -> anyhow::Result<()> {
    let conn = Connection::new("crud-not-connected", ConnectionConfig::default())?;
    let user = conn.define_types("user", &[("name", "string")]).await?;

    assert!(matches!(
        user.get(1, false).await,
        Err(DbxError::NotConnected(_))
    ));
    assert!(matches!(
        conn.sync_models().await,
        Err(DbxError::NotConnected(_))
    ));

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_sync_rejects_dangling_reference() -> anyhow::Result<()> {
    let conn = Connection::new("crud-dangling-fk", ConnectionConfig::default())?;
    conn.connect().await?;
    conn.define("comment", vec![ModelField::foreign_key("post", "post", "id")])
        .await?;

    assert!(matches!(
        conn.sync_models().await,
        Err(DbxError::UnknownReference { .. })
    ));

    conn.define_types("post", &[("title", "string")]).await?;
    assert_ok!(conn.sync_models().await);

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_models_shared_between_handles() -> anyhow::Result<()> {
    let (conn, user, _) = shop("crud-shared-handles").await?;
    user.create_json(json!({"name": "ann"})).await?;

    let same = Connection::lookup("crud-shared-handles")?;
    let user_again = same.model("user").await?;
    assert_eq!(user_again.count(&Query::new(), false).await?, 1);

    conn.close().await?;
    Ok(())
}
