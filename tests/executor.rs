mod common;

use common::*;
use isomapper::prelude::*;
use isomapper::transport::{QUERY_EVENT, QueryResponse};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_repeated_select_hits_cache() {
    let store = FixtureStore::new(item_rows());
    let (items, cache) = Items::cached();
    let mapper = server(items, &store);

    let first = mapper.query().where_op("age", Operator::Gt, 10).await.unwrap();
    let second = mapper.query().where_op("age", Operator::Gt, 10).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.executions(), 1);
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_cache_key_is_rendered_text() {
    let store = FixtureStore::new(item_rows());
    let (items, cache) = Items::cached();
    let mapper = server(items, &store);

    mapper.query().where_op("age", Operator::Gt, 10).await.unwrap();
    mapper.query().where_op("age", Operator::Gt, 11).await.unwrap();

    assert_eq!(store.executions(), 2);
    assert_eq!(cache.stats().entries, 2);
    assert!(
        cache
            .lookup(r#"select * from "items" where "age" > 10"#)
            .is_some()
    );
}

#[tokio::test]
async fn test_mutation_clears_cache() {
    let store = FixtureStore::new(item_rows());
    let (items, cache) = Items::cached();
    let mapper = server(items, &store);

    mapper.query().await.unwrap();
    assert_eq!(cache.stats().entries, 1);

    mapper.query().where_eq("id", 1).del().await.unwrap();
    assert_eq!(cache.stats().entries, 0);

    mapper.query().await.unwrap();
    assert_eq!(store.executions(), 3);
    let stats = cache.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn test_empty_result_not_cached() {
    let store = FixtureStore::empty();
    let (items, cache) = Items::cached();
    let mapper = server(items, &store);

    mapper.query().await.unwrap();
    mapper.query().await.unwrap();

    assert_eq!(store.executions(), 2);
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_failing_hook_stops_execution() {
    let store = FixtureStore::new(item_rows());
    let cache = Arc::new(QueryCache::default());
    let mapper = server(
        Locked {
            cache: Arc::clone(&cache),
        },
        &store,
    );

    let result = mapper.find().await;

    assert_eq!(result, Err(MapperError::hook("items are locked")));
    assert_eq!(store.executions(), 0);
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_find_and_find_one_shape_rows() {
    let store = FixtureStore::new(item_rows());
    let mapper = server(Items::default(), &store);

    let all = mapper.find().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].name, "bucket");

    let one = mapper.find_one().where_eq("name", "anvil").await.unwrap();
    assert_eq!(
        one,
        Some(Item {
            id: 1,
            name: "anvil".into()
        })
    );
    assert_eq!(
        store.executed_sql().last().unwrap(),
        r#"select * from "items" where "name" = $1 limit 1"#
    );
}

#[tokio::test]
async fn test_custom_data_parser() {
    let store = FixtureStore::new(item_rows());
    let mapper = server(Items::default(), &store);

    let names = mapper
        .query()
        .select(["name"])
        .data_parser(|rows| {
            Ok(rows
                .into_iter()
                .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(str::to_string))
                .collect::<Vec<_>>())
        })
        .await
        .unwrap();

    assert_eq!(names, vec!["anvil", "bucket", "chisel"]);
}

#[tokio::test]
async fn test_insert_and_update() {
    let store = FixtureStore::new(vec![row(json!({"id": 4, "name": "drill"}))]);
    let mapper = server(Items::default(), &store);

    let inserted = mapper
        .insert(&json!({"id": 4, "name": "drill"}))
        .await
        .unwrap();
    assert_eq!(inserted.name, "drill");
    let compiled = store.last().unwrap();
    assert_eq!(
        compiled.sql,
        r#"insert into "items" ("id", "name") values ($1, $2) returning *"#
    );
    assert_eq!(compiled.bindings, vec![Value::Int(4), Value::String("drill".into())]);

    mapper
        .update(&Item {
            id: 4,
            name: "drill".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        store.last().unwrap().sql,
        r#"update "items" set "name" = $1 where "id" = $2 returning *"#
    );

    let missing = mapper.update(&json!({"name": "x"})).await;
    assert!(matches!(missing, Err(MapperError::Descriptor(_))));
}

#[tokio::test]
async fn test_table_created_once() {
    let store = FixtureStore::without_table(item_rows());
    let mapper = server(Items::default(), &store);
    let mut events = mapper.subscribe();

    mapper.query().await.unwrap();
    mapper.query().await.unwrap();
    mapper.table_ready().await.unwrap();

    assert_eq!(store.has_table_calls(), 1);
    let created = store.created();
    assert_eq!(created.len(), 1);
    assert!(created[0].starts_with(r#"create table if not exists "items" ("id" serial primary key"#));
    assert_eq!(
        events.recv().await.unwrap(),
        MapperEvent::TableCreated {
            table: "items".into()
        }
    );
}

#[tokio::test]
async fn test_existing_table_is_left_alone() {
    let store = FixtureStore::new(item_rows());
    let mapper = server(Items::default(), &store);

    mapper.table_ready().await.unwrap();

    assert_eq!(store.has_table_calls(), 1);
    assert!(store.created().is_empty());
}

#[tokio::test]
async fn test_missing_table_name() {
    let store = FixtureStore::empty();
    let result = Mapper::new(Nameless, ExecutionContext::server(store));
    assert!(matches!(result, Err(MapperError::TableNameMissing)));
}

#[tokio::test]
async fn test_client_forwards_descriptor() {
    let (transport, mut rx) = ChannelTransport::pair(8);
    let mapper = Mapper::new(Items::default(), ExecutionContext::client(Arc::new(transport))).unwrap();

    let peer = tokio::spawn(async move {
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, QUERY_EVENT);
        assert_eq!(envelope.request.mapper_name, "items");
        let descriptor = envelope.request.query_descriptor.clone();
        let _ = envelope.reply.send(QueryResponse::ok(item_rows()));
        descriptor
    });

    let found = mapper.find().where_op("age", Operator::Gt, 10).await.unwrap();
    assert_eq!(found.len(), 3);

    let descriptor = peer.await.unwrap();
    let sql = isomapper::render(descriptor, "items", &TransformRegistry::new()).unwrap();
    assert_eq!(sql, r#"select * from "items" where "age" > 10"#);
}

#[tokio::test]
async fn test_client_surfaces_remote_error() {
    let (transport, mut rx) = ChannelTransport::pair(8);
    let mapper = Mapper::new(Items::default(), ExecutionContext::client(Arc::new(transport))).unwrap();

    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let _ = envelope.reply.send(QueryResponse::err("relation is gone"));
        }
    });

    let result = mapper.query().await;
    assert_eq!(result, Err(MapperError::Remote("relation is gone".into())));
}

#[tokio::test]
async fn test_client_cannot_replay() {
    let (transport, _rx) = ChannelTransport::pair(1);
    let mapper = Mapper::new(Items::default(), ExecutionContext::client(Arc::new(transport))).unwrap();

    let result = mapper.from_descriptor(Descriptor::default()).await;
    assert_eq!(result, Err(MapperError::UnsupportedContext("server")));
}

#[tokio::test]
async fn test_find_one_keeps_limit_after_select() {
    let store = FixtureStore::new(item_rows());
    let mapper = server(Items::default(), &store);

    let one = mapper.find_one().select(["id", "name"]).await.unwrap();

    assert_eq!(one.map(|item| item.id), Some(1));
    assert_eq!(
        store.executed_sql().last().unwrap(),
        r#"select "id", "name" from "items" limit 1"#
    );
}

#[tokio::test]
async fn test_failing_after_hook_skips_write_back() {
    let store = FixtureStore::new(item_rows());
    let cache = Arc::new(QueryCache::default());
    let mapper = server(
        Audited {
            cache: Arc::clone(&cache),
        },
        &store,
    );

    let result = mapper.query().await;

    assert_eq!(result, Err(MapperError::hook("audit failed")));
    assert_eq!(store.executions(), 1);
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_concurrent_executions_share_table_check() {
    let store = FixtureStore::without_table(item_rows());
    let mapper = server(Items::default(), &store);

    let (a, b, c) = tokio::join!(mapper.query(), mapper.query(), mapper.query());

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(store.has_table_calls(), 1);
    assert_eq!(store.created().len(), 1);
    assert_eq!(store.executions(), 3);
}

#[tokio::test]
async fn test_missing_table_without_bootstrap() {
    let store = FixtureStore::without_table(item_rows());
    let mapper = server(ExistingItems, &store);

    let result = mapper.query().await;

    assert_eq!(
        result,
        Err(MapperError::Database("table 'items' does not exist".into()))
    );
    assert!(store.created().is_empty());
    assert_eq!(store.executions(), 0);
}

#[tokio::test]
async fn test_nulls_inline_and_nested_values_as_json() {
    let store = FixtureStore::new(vec![row(json!({"id": 5, "name": "file"}))]);
    let mapper = server(Items::default(), &store);

    mapper
        .insert(&json!({"id": 5, "name": "file", "age": null, "tags": ["a", "b"]}))
        .await
        .unwrap();

    let compiled = store.last().unwrap();
    assert_eq!(
        compiled.sql,
        r#"insert into "items" ("age", "id", "name", "tags") values (null, $1, $2, $3) returning *"#
    );
    assert_eq!(
        compiled.bindings,
        vec![
            Value::Int(5),
            Value::String("file".into()),
            Value::Json(json!(["a", "b"])),
        ]
    );
}

#[tokio::test]
async fn test_query_from_runs_the_pipeline() {
    let store = FixtureStore::new(item_rows());
    let (items, cache) = Items::cached();
    let mapper = server(items, &store);

    let saved = to_descriptor(&Query::table("items").where_op("age", Operator::Gt, 10)).unwrap();
    let first = mapper.query_from(saved.clone()).unwrap().await.unwrap();
    let second = mapper.query_from(saved).unwrap().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.executions(), 1);
    assert_eq!(cache.stats().hits, 1);
}
