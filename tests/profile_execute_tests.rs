//! Integration tests for store-side execution: input schemas, template
//! chaining through stored documents, output projection, unauthenticated
//! opacity, and the restricted source set.

mod common;

use cascade::api::Request;
use cascade::context::{Context, Namespace};
use cascade::error::ErrorKind;
use cascade::schema::FieldData;
use cascade::store::ProfileEntry;
use common::{memory_store, RecordingHandler, Script};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

fn entry(path: &str, profile: &str) -> ProfileEntry {
    ProfileEntry {
        path: path.into(),
        profile: profile.into(),
        ..ProfileEntry::default()
    }
}

fn caller(body: Value) -> (Request, FieldData) {
    let data = match body {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let req = Request {
        client_token: "caller-token".into(),
        data: data.clone(),
        ..Request::default()
    };
    (req, FieldData::new(IndexMap::new(), data))
}

#[tokio::test]
async fn template_chaining_works_through_the_store() {
    let handler = RecordingHandler::new();
    handler.script("kv/a", Script::Respond(json!({"next": "b"})));
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    store
        .set(
            &ctx,
            entry(
                "chain",
                r#"
context "c" {
  request "one" {
    operation = "read"
    path      = "kv/a"
  }
  request "two" {
    operation = "read"
    path = {
      eval_source = "template"
      eval_type   = "string"
      template    = "kv/{{.responses.one.data.next}}"
    }
  }
}
"#,
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({}));
    let result = store.execute(&ctx, "chain", false, &req, &data).await.unwrap();
    assert!(result.is_none(), "no output block means no response");
    assert_eq!(handler.seen_paths(), vec!["kv/a", "kv/b"]);

    // The engine defaulted every request to the caller's token.
    for seen in handler.seen_requests() {
        assert_eq!(seen.client_token, "caller-token");
    }
}

#[tokio::test]
async fn declared_input_is_required_and_flows_into_paths() {
    let handler = RecordingHandler::new();
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    store
        .set(
            &ctx,
            entry(
                "named",
                r#"
input {
  fields {
    string "name" { required = true }
  }
}
context "c" {
  request "r" {
    operation = "read"
    path = {
      eval_source = "template"
      eval_type   = "string"
      template    = "kv/data/{{input.name}}"
    }
  }
}
"#,
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({}));
    let err = store
        .execute(&ctx, "named", false, &req, &data)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));
    assert!(err.to_string().contains("name"), "got: {err}");
    assert!(handler.seen_paths().is_empty());

    let (req, data) = caller(json!({"name": "x"}));
    store
        .execute(&ctx, "named", false, &req, &data)
        .await
        .unwrap();
    assert_eq!(handler.seen_paths(), vec!["kv/data/x"]);
}

#[tokio::test]
async fn input_source_reads_fields_directly() {
    let handler = RecordingHandler::new();
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    store
        .set(
            &ctx,
            entry(
                "direct",
                r#"
input {
  fields {
    string "target" { required = true }
  }
}
context "c" {
  request "r" {
    operation = "read"
    path = {
      eval_source = "input"
      eval_type   = "string"
      field_name  = "target"
    }
  }
}
"#,
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({"target": "kv/direct"}));
    store
        .execute(&ctx, "direct", false, &req, &data)
        .await
        .unwrap();
    assert_eq!(handler.seen_paths(), vec!["kv/direct"]);
}

#[tokio::test]
async fn output_blocks_produce_responses() {
    let handler = RecordingHandler::new();
    handler.script("kv/a", Script::Respond(json!({"id": "m-1"})));
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    store
        .set(
            &ctx,
            entry(
                "projected",
                r#"
context "c" {
  request "one" {
    operation = "read"
    path      = "kv/a"
  }
}
output {
  data = {
    eval_source = "response"
    eval_type   = "map"
    name        = "c.one"
    field       = "data"
  }
}
"#,
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({}));
    let response = store
        .execute(&ctx, "projected", false, &req, &data)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.data["id"], json!("m-1"));
}

#[tokio::test]
async fn unauthed_execution_is_opaque_about_existence() {
    let handler = RecordingHandler::new();
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    store
        .set(
            &ctx,
            entry(
                "exists-but-not-allowed",
                "context \"c\" {\n  request \"r\" {\n    operation = \"read\"\n    path = \"kv/a\"\n  }\n}\n",
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({}));
    let missing = store
        .execute(&ctx, "missing", true, &req, &data)
        .await
        .unwrap_err();
    let forbidden = store
        .execute(&ctx, "exists-but-not-allowed", true, &req, &data)
        .await
        .unwrap_err();

    assert_eq!(missing.kind(), Some(ErrorKind::Permission));
    assert_eq!(missing.to_string(), forbidden.to_string());
    assert!(handler.seen_paths().is_empty());
}

#[tokio::test]
async fn unauthed_execution_runs_when_allowed() {
    let handler = RecordingHandler::new();
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    let mut allowed = entry(
        "open",
        "context \"c\" {\n  request \"r\" {\n    operation = \"read\"\n    path = \"kv/a\"\n  }\n}\n",
    );
    allowed.allow_unauthenticated = true;
    store.set(&ctx, allowed, None).await.unwrap();

    let (req, data) = caller(json!({}));
    store.execute(&ctx, "open", true, &req, &data).await.unwrap();
    assert_eq!(handler.seen_paths(), vec!["kv/a"]);
}

#[tokio::test]
async fn authenticated_execution_of_missing_profile_is_not_found() {
    let store = memory_store(RecordingHandler::new());
    let ctx = Context::background();

    let (req, data) = caller(json!({}));
    let err = store
        .execute(&ctx, "missing", false, &req, &data)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn stored_profiles_cannot_use_the_cel_source() {
    let handler = RecordingHandler::new();
    let store = memory_store(handler.clone());
    let ctx = Context::background();

    store
        .set(
            &ctx,
            entry(
                "celful",
                r#"
context "c" {
  request "r" {
    operation = "read"
    path = { eval_source = "cel", eval_type = "string", expression = "'kv/a'" }
  }
}
"#,
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({}));
    let err = store
        .execute(&ctx, "celful", false, &req, &data)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("unknown value for 'eval_source': cel"),
        "got: {err}"
    );
    assert!(handler.seen_paths().is_empty());
}

#[tokio::test]
async fn execution_is_namespace_scoped() {
    let handler = RecordingHandler::new();
    let store = memory_store(handler.clone());
    let root = Context::background();
    let team = Context::background().with_namespace(Namespace::new("ns1", "team-a/"));

    store
        .set(
            &root,
            entry(
                "scoped",
                "context \"c\" {\n  request \"r\" {\n    operation = \"read\"\n    path = \"kv/a\"\n  }\n}\n",
            ),
            None,
        )
        .await
        .unwrap();

    let (req, data) = caller(json!({}));
    let err = store
        .execute(&team, "scoped", false, &req, &data)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn malformed_documents_are_rejected_at_write_time() {
    let store = memory_store(RecordingHandler::new());
    let ctx = Context::background();

    let err = store
        .set(&ctx, entry("broken", "output {}\n"), None)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("at least one 'context' block"),
        "got: {err}"
    );
    assert!(store.get(&ctx, "broken").await.unwrap().is_none());

    let err = store
        .set(
            &ctx,
            entry(
                "badname",
                "context \"c\" {\n  request \"bad.name\" { operation = \"read\" }\n}\n",
            ),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bad.name"), "got: {err}");
}
