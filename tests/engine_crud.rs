//! End-to-end CRUD behavior over a scripted in-memory execution handle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use recordmap::{
    DbHandle, EngineConfig, EngineError, FullConfig, MemoryCache, MessageCollector, RecordCache,
    RecordService, Registry, Row, SaveAction, ServiceContext, UNKNOWN_ROW_COUNT,
};

/// Scripted handle: records every call and replays queued responses, with
/// benign defaults (one row affected, empty result sets, nothing exists).
#[derive(Default)]
struct MockHandle {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    query_results: Mutex<VecDeque<Vec<Row>>>,
    execute_results: Mutex<VecDeque<i64>>,
    exists_results: Mutex<VecDeque<bool>>,
    generated_keys: Mutex<VecDeque<Vec<Value>>>,
}

impl MockHandle {
    fn new() -> Self {
        Self::default()
    }

    fn queue_rows(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.query_results.lock().unwrap().push_back(rows);
    }

    fn queue_affected(&self, n: i64) {
        self.execute_results.lock().unwrap().push_back(n);
    }

    fn queue_exists(&self, found: bool) {
        self.exists_results.lock().unwrap().push_back(found);
    }

    fn queue_keys(&self, keys: Vec<Value>) {
        self.generated_keys.lock().unwrap().push_back(keys);
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, sql: &str, values: &[Value]) {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), values.to_vec()));
    }
}

#[async_trait]
impl DbHandle for MockHandle {
    async fn execute_one(&self, sql: &str, values: &[Value]) -> Result<i64, EngineError> {
        self.log(sql, values);
        Ok(self.execute_results.lock().unwrap().pop_front().unwrap_or(1))
    }

    async fn execute_batch(
        &self,
        sql: &str,
        value_rows: &[Vec<Value>],
    ) -> Result<Vec<i64>, EngineError> {
        let mut counts = Vec::with_capacity(value_rows.len());
        for values in value_rows {
            self.log(sql, values);
            counts.push(self.execute_results.lock().unwrap().pop_front().unwrap_or(1));
        }
        Ok(counts)
    }

    async fn insert_with_keys(
        &self,
        sql: &str,
        values: &[Value],
        key_columns: &[String],
    ) -> Result<(i64, Vec<Value>), EngineError> {
        self.log(sql, values);
        let keys = self
            .generated_keys
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| key_columns.iter().map(|_| json!(1)).collect());
        Ok((1, keys))
    }

    async fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError> {
        self.log(sql, values);
        Ok(self
            .query_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn exists(&self, sql: &str, values: &[Value]) -> Result<bool, EngineError> {
        self.log(sql, values);
        Ok(self
            .exists_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false))
    }
}

/// Reversible test cipher: wraps plain text in a marker.
struct MarkerCipher;

impl recordmap::FieldCipher for MarkerCipher {
    fn encrypt(&self, text: &str) -> Result<String, EngineError> {
        Ok(format!("enc({})", text))
    }

    fn decrypt(&self, text: &str) -> Result<String, EngineError> {
        Ok(text
            .strip_prefix("enc(")
            .and_then(|t| t.strip_suffix(')'))
            .unwrap_or(text)
            .to_string())
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build_model(records: Value) -> Arc<recordmap::ReadyModel> {
    init_tracing();
    let config = FullConfig {
        data_types: Vec::new(),
        records: serde_json::from_value(records).unwrap(),
    };
    Arc::new(
        Registry::new(config, EngineConfig::default())
            .unwrap()
            .build()
            .unwrap(),
    )
}

fn customer_model() -> Arc<recordmap::ReadyModel> {
    build_model(json!([{
        "name": "customer",
        "key_generated": true,
        "fields": [
            { "name": "custId", "role": "primaryKey", "data_type": "_number" },
            { "name": "name", "required": true },
            { "name": "city" }
        ]
    }]))
}

fn row(v: Value) -> Row {
    v.as_object().cloned().unwrap()
}

#[tokio::test]
async fn insert_generates_key_and_reads_back() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    handle.queue_keys(vec![json!(42)]);
    let mut new_row = row(json!({ "name": "Ann", "city": "Pune" }));
    let affected = service
        .insert(&handle, &record, &mut new_row, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(new_row.get("custId"), Some(&json!(42)));
    assert!(msgs.is_empty());

    handle.queue_rows(vec![json!({ "custId": 42, "name": "Ann", "city": "Pune" })]);
    let found = service
        .read_one(&handle, &record, &row(json!({ "custId": 42 })), &ctx, &mut msgs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&json!("Ann")));

    let calls = handle.calls();
    assert!(calls[0].0.starts_with("INSERT INTO \"customer\""));
    assert!(calls[1].0.contains("WHERE \"custId\" = $1::bigint"));
}

#[tokio::test]
async fn insert_with_validation_failure_does_not_touch_the_store() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    // required name missing
    let mut new_row = row(json!({ "city": "Pune" }));
    let affected = service
        .insert(&handle, &record, &mut new_row, &ServiceContext::new(), &mut msgs)
        .await
        .unwrap();
    assert_eq!(affected, 0);
    assert!(msgs.has_errors());
    assert!(handle.calls().is_empty());
}

#[tokio::test]
async fn update_changes_the_row() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    let mut changed = row(json!({ "custId": 42, "name": "Anne", "city": "Pune" }));
    let affected = service
        .update(&handle, &record, &mut changed, &ServiceContext::new(), &mut msgs)
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let (sql, params) = handle.calls().remove(0);
    assert!(sql.starts_with("UPDATE \"customer\" SET"));
    assert!(sql.contains("WHERE \"custId\""));
    assert!(params.contains(&json!("Anne")));
}

#[tokio::test]
async fn partial_update_binds_only_present_fields() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    // no city in the input: it must not be set to null
    let mut changed = row(json!({ "custId": 42, "name": "Anne" }));
    service
        .update(&handle, &record, &mut changed, &ServiceContext::new(), &mut msgs)
        .await
        .unwrap();

    let (sql, params) = handle.calls().remove(0);
    assert!(sql.contains("\"name\" = $1"));
    assert!(!sql.contains("\"city\""));
    assert_eq!(params.len(), 2); // name + key
}

#[tokio::test]
async fn filter_without_conditions_is_gated() {
    let model = build_model(json!([
        {
            "name": "audit_log",
            "fields": [{ "name": "entry" }]
        },
        {
            "name": "country",
            "ok_to_select_all": true,
            "fields": [{ "name": "code" }]
        }
    ]));
    let service = RecordService::new(model.clone());
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    let gated = model.record("audit_log").unwrap();
    let err = service
        .filter(&handle, gated, &Row::new(), &ctx, &mut msgs)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoFilterCondition(name) if name == "audit_log"));

    let open = model.record("country").unwrap();
    service
        .filter(&handle, open, &Row::new(), &ctx, &mut msgs)
        .await
        .unwrap();
    assert!(handle.calls()[0].0.ends_with(" WHERE 1 = 1"));
}

#[tokio::test]
async fn filter_honors_comparator_and_sort_inputs() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    let inputs = row(json!({
        "city": "P",
        "city$cmp": ">=",
        "_sortColumn": "name",
        "_sortOrder": "desc"
    }));
    service
        .filter(&handle, &record, &inputs, &ctx, &mut msgs)
        .await
        .unwrap();
    let (sql, params) = handle.calls().remove(0);
    assert!(sql.contains("\"city\" >= $1"));
    assert!(sql.ends_with("ORDER BY \"name\" DESC"));
    assert_eq!(params, vec![json!("P")]);

    // between without its companion to-value is a hard error
    let err = service
        .filter(
            &handle,
            &record,
            &row(json!({ "city": "A", "city$cmp": "><" })),
            &ctx,
            &mut msgs,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingToValue(field) if field == "city"));
}

fn versioned_model() -> Arc<recordmap::ReadyModel> {
    build_model(json!([{
        "name": "account",
        "use_timestamp_check": true,
        "fields": [
            { "name": "id", "role": "primaryKey", "data_type": "_number" },
            { "name": "balance", "data_type": "_decimal" },
            { "name": "updatedAt", "role": "modifiedAt", "data_type": "_timestamp" }
        ]
    }]))
}

#[tokio::test]
async fn stale_timestamp_update_is_rejected() {
    let model = versioned_model();
    let record = model.record("account").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    handle.queue_affected(0); // another transaction got there first
    let mut changed = row(json!({
        "id": 7,
        "balance": 10.5,
        "updatedAt": "2026-01-01T00:00:00Z"
    }));
    let err = service
        .update(&handle, &record, &mut changed, &ServiceContext::new(), &mut msgs)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification(name) if name == "account"));

    let (sql, params) = handle.calls().remove(0);
    assert!(sql.contains("AND \"updatedAt\" = "));
    assert_eq!(params.last(), Some(&json!("2026-01-01T00:00:00Z")));
}

#[tokio::test]
async fn timestamp_check_requires_the_prior_value() {
    let model = versioned_model();
    let record = model.record("account").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    let mut changed = row(json!({ "id": 7, "balance": 10.5 }));
    let err = service
        .update(&handle, &record, &mut changed, &ServiceContext::new(), &mut msgs)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingTimestamp(name) if name == "account"));
    assert!(handle.calls().is_empty());
}

#[tokio::test]
async fn encrypted_field_round_trips_through_the_cipher() {
    let model = build_model(json!([{
        "name": "person",
        "fields": [
            { "name": "id", "role": "primaryKey", "data_type": "_number" },
            { "name": "ssn", "encrypted": true }
        ]
    }]));
    let record = model.record("person").unwrap().clone();
    let service = RecordService::new(model).with_cipher(Arc::new(MarkerCipher));
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    let mut new_row = row(json!({ "id": 1, "ssn": "123-45-6789" }));
    service
        .insert(&handle, &record, &mut new_row, &ctx, &mut msgs)
        .await
        .unwrap();
    let (_, params) = handle.calls().remove(0);
    assert!(params.contains(&json!("enc(123-45-6789)")));

    handle.queue_rows(vec![json!({ "id": 1, "ssn": "enc(123-45-6789)" })]);
    let found = service
        .read_one(&handle, &record, &row(json!({ "id": 1 })), &ctx, &mut msgs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("ssn"), Some(&json!("123-45-6789")));

    handle.queue_rows(vec![
        json!({ "id": 1, "ssn": "enc(123-45-6789)" }),
        json!({ "id": 2, "ssn": "enc(987-65-4321)" }),
    ]);
    let all = service
        .read_many(
            &handle,
            &record,
            &[row(json!({ "id": 1 })), row(json!({ "id": 2 }))],
            &ctx,
            &mut msgs,
        )
        .await
        .unwrap();
    assert_eq!(all[1].get("ssn"), Some(&json!("987-65-4321")));
}

#[tokio::test]
async fn cached_read_skips_the_store_until_invalidated() {
    let model = build_model(json!([{
        "name": "customer",
        "cacheable": true,
        "records_to_notify": ["region"],
        "fields": [
            { "name": "custId", "role": "primaryKey", "data_type": "_number" },
            { "name": "name" }
        ]
    },
    {
        "name": "region",
        "cacheable": true,
        "fields": [
            { "name": "code", "role": "primaryKey" },
            { "name": "label" }
        ]
    }]));
    let record = model.record("customer").unwrap().clone();
    let cache = Arc::new(MemoryCache::new());
    let service = RecordService::new(model).with_cache(cache.clone());
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    handle.queue_rows(vec![json!({ "custId": 9, "name": "Ann" })]);
    let keys = row(json!({ "custId": 9 }));
    service
        .read_one(&handle, &record, &keys, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(handle.calls().len(), 1);

    // second read is served from cache
    let found = service
        .read_one(&handle, &record, &keys, &ctx, &mut msgs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&json!("Ann")));
    assert_eq!(handle.calls().len(), 1);

    // an update invalidates this record and every notified sibling
    cache.put("region", None, json!([{ "key": "w", "value": "West" }]));
    let mut changed = row(json!({ "custId": 9, "name": "Anne" }));
    service
        .update(&handle, &record, &mut changed, &ctx, &mut msgs)
        .await
        .unwrap();
    assert!(cache.get("customer", Some("9")).is_none());
    assert!(cache.get("region", None).is_none());
}

#[tokio::test]
async fn save_resolves_the_action_per_row() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    // generated key absent: add
    let mut fresh = row(json!({ "name": "Ann" }));
    let (action, _) = service
        .save_one(&handle, &record, &mut fresh, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(action, SaveAction::Add);

    // generated key present: modify
    let mut known = row(json!({ "custId": 42, "name": "Anne" }));
    let (action, _) = service
        .save_one(&handle, &record, &mut known, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(action, SaveAction::Modify);

    // explicit action wins
    let mut doomed = row(json!({ "custId": 42, "name": "Anne", "_saveAction": "delete" }));
    let (action, _) = service
        .save_one(&handle, &record, &mut doomed, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(action, SaveAction::Delete);
}

#[tokio::test]
async fn save_probes_existence_for_assigned_keys() {
    let model = build_model(json!([{
        "name": "country",
        "fields": [
            { "name": "code", "role": "primaryKey" },
            { "name": "label" }
        ]
    }]));
    let record = model.record("country").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    handle.queue_exists(false);
    let mut new_row = row(json!({ "code": "in", "label": "India" }));
    let (action, _) = service
        .save_one(&handle, &record, &mut new_row, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(action, SaveAction::Add);

    handle.queue_exists(true);
    let mut known = row(json!({ "code": "in", "label": "Bharat" }));
    let (action, _) = service
        .save_one(&handle, &record, &mut known, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(action, SaveAction::Modify);
}

fn order_model() -> Arc<recordmap::ReadyModel> {
    build_model(json!([
        {
            "name": "order",
            "key_generated": true,
            "child_records_to_read": ["orderLine"],
            "child_records_to_save": ["orderLine"],
            "fields": [
                { "name": "orderId", "role": "primaryKey", "data_type": "_number" },
                { "name": "customer" }
            ]
        },
        {
            "name": "orderLine",
            "fields": [
                { "name": "lineNo", "role": "primaryKey", "data_type": "_number" },
                { "name": "orderId", "role": "parentKey", "data_type": "_number" },
                { "name": "item" }
            ]
        }
    ]))
}

#[tokio::test]
async fn read_attaches_child_rows() {
    let model = order_model();
    let record = model.record("order").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    handle.queue_rows(vec![json!({ "orderId": 7, "customer": "Ann" })]);
    handle.queue_rows(vec![
        json!({ "lineNo": 1, "orderId": 7, "item": "widget" }),
        json!({ "lineNo": 2, "orderId": 7, "item": "gadget" }),
    ]);
    let found = service
        .read_one(&handle, &record, &row(json!({ "orderId": 7 })), &ctx, &mut msgs)
        .await
        .unwrap()
        .unwrap();
    let lines = found.get("orderLine").and_then(Value::as_array).unwrap();
    assert_eq!(lines.len(), 2);

    let calls = handle.calls();
    assert!(calls[1].0.contains("WHERE \"orderId\" IN ($1::bigint)"));
    assert_eq!(calls[1].1, vec![json!(7)]);
}

#[tokio::test]
async fn insert_saves_child_rows_with_the_generated_key() {
    let model = order_model();
    let record = model.record("order").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    handle.queue_keys(vec![json!(77)]);
    let mut new_row = row(json!({
        "customer": "Ann",
        "orderLine": [
            { "lineNo": 1, "item": "widget" },
            { "lineNo": 2, "item": "gadget" }
        ]
    }));
    service
        .insert(&handle, &record, &mut new_row, &ctx, &mut msgs)
        .await
        .unwrap();

    let calls = handle.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].0.starts_with("INSERT INTO \"orderLine\""));
    // every child row carries the parent's fresh key
    assert!(calls[1].1.contains(&json!(77)));
    assert!(calls[2].1.contains(&json!(77)));
}

#[tokio::test]
async fn delete_removes_children_first() {
    let model = order_model();
    let record = model.record("order").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    service
        .delete(&handle, &record, &row(json!({ "orderId": 7 })), &ctx, &mut msgs)
        .await
        .unwrap();

    let calls = handle.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].0.starts_with("DELETE FROM \"orderLine\""));
    assert!(calls[1].0.starts_with("DELETE FROM \"order\""));
}

#[tokio::test]
async fn batch_counts_surface_unknown_as_none() {
    let model = customer_model();
    let record = model.record("customer").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    let rows = vec![
        row(json!({ "name": "Ann" })),
        row(json!({ "name": "Bea" })),
    ];
    let total = service
        .insert_many(&handle, &record, &rows, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(total, Some(2));

    handle.queue_affected(1);
    handle.queue_affected(UNKNOWN_ROW_COUNT);
    let total = service
        .insert_many(&handle, &record, &rows, &ctx, &mut msgs)
        .await
        .unwrap();
    assert_eq!(total, None);
}

#[tokio::test]
async fn read_only_record_refuses_writes() {
    let model = build_model(json!([{
        "name": "rate_view",
        "read_only": true,
        "fields": [
            { "name": "id", "role": "primaryKey", "data_type": "_number" },
            { "name": "rate", "data_type": "_decimal" }
        ]
    }]));
    let record = model.record("rate_view").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    let mut r = row(json!({ "id": 1, "rate": 2.5 }));
    let err = service
        .insert(&handle, &record, &mut r, &ServiceContext::new(), &mut msgs)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReadOnly(name) if name == "rate_view"));
}

#[tokio::test]
async fn list_and_suggest_use_designated_fields() {
    let model = build_model(json!([{
        "name": "city",
        "list_field": "label",
        "suggest_key_field": "label",
        "fields": [
            { "name": "cityId", "role": "primaryKey", "data_type": "_number" },
            { "name": "label" }
        ]
    }]));
    let record = model.record("city").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();

    handle.queue_rows(vec![json!({ "key": 1, "value": "Pune" })]);
    let listed = service.list(&handle, &record, None).await.unwrap();
    assert_eq!(listed[0].get("value"), Some(&json!("Pune")));

    handle.queue_rows(vec![json!({ "cityId": 1, "label": "Pune" })]);
    service.suggest(&handle, &record, "Pu", false).await.unwrap();
    let calls = handle.calls();
    assert!(calls[0].0.contains("AS \"key\""));
    assert!(calls[1].0.contains("LIKE $1"));
    assert_eq!(calls[1].1, vec![json!("Pu%")]);
}

#[tokio::test]
async fn list_decrypts_the_designated_value() {
    let model = build_model(json!([{
        "name": "secret_city",
        "list_field": "label",
        "fields": [
            { "name": "cityId", "role": "primaryKey", "data_type": "_number" },
            { "name": "label", "encrypted": true }
        ]
    }]));
    let record = model.record("secret_city").unwrap().clone();
    let service = RecordService::new(model).with_cipher(Arc::new(MarkerCipher));
    let handle = MockHandle::new();

    handle.queue_rows(vec![json!({ "key": 1, "value": "enc(Pune)" })]);
    let listed = service.list(&handle, &record, None).await.unwrap();
    assert_eq!(listed[0].get("value"), Some(&json!("Pune")));
}

#[tokio::test]
async fn grouped_list_requires_a_group_field() {
    let model = build_model(json!([{
        "name": "city",
        "list_field": "label",
        "fields": [
            { "name": "cityId", "role": "primaryKey", "data_type": "_number" },
            { "name": "label" }
        ]
    }]));
    let record = model.record("city").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();

    let err = service
        .list(&handle, &record, Some("west"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Design(_)));
    assert!(handle.calls().is_empty());
}

#[tokio::test]
async fn update_dispatches_child_saves_per_row() {
    let model = order_model();
    let record = model.record("order").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let ctx = ServiceContext::new();
    let mut msgs = MessageCollector::new();

    // the child row resolves its own action through the existence probe
    handle.queue_exists(false);
    let mut changed = row(json!({
        "orderId": 7,
        "customer": "Anne",
        "orderLine": [{ "lineNo": 1, "item": "widget" }]
    }));
    service
        .update(&handle, &record, &mut changed, &ctx, &mut msgs)
        .await
        .unwrap();

    let calls = handle.calls();
    assert!(calls[0].0.starts_with("UPDATE \"order\""));
    assert!(calls[1].0.starts_with("SELECT 1 FROM \"orderLine\""));
    assert!(calls[2].0.starts_with("INSERT INTO \"orderLine\""));
    // the child inherits the parent key before saving
    assert!(calls[2].1.contains(&json!(7)));
}

#[tokio::test]
async fn runtime_params_fill_declared_defaults() {
    let model = build_model(json!([{
        "name": "note",
        "fields": [
            { "name": "id", "role": "primaryKey", "data_type": "_number" },
            { "name": "text" },
            { "name": "author", "default_param": "_user" }
        ]
    }]));
    let record = model.record("note").unwrap().clone();
    let service = RecordService::new(model);
    let handle = MockHandle::new();
    let mut msgs = MessageCollector::new();

    let mut ctx = ServiceContext::new();
    ctx.runtime_params = row(json!({ "_user": "ops" }));
    let mut new_row = row(json!({ "id": 3, "text": "hi" }));
    service
        .insert(&handle, &record, &mut new_row, &ctx, &mut msgs)
        .await
        .unwrap();
    let (_, params) = handle.calls().remove(0);
    assert!(params.contains(&json!("ops")));
}
