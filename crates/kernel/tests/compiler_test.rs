#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query compiler integration tests.
//!
//! Full compilation passes (filter → search → sort → project → paginate →
//! execute) against the in-memory adapter and fixture rows.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use sift_kernel::config::CompilerConfig;
use sift_kernel::error::{AdapterError, AdapterResult};
use sift_kernel::query::{
    AllowedFields, DiagnosticKind, FieldCondition, FilterValue, InMemoryAdapter, PageMeta,
    ParameterBag, ProjectionTree, QueryCompiler, RequestContext, SearchField, SortSpec,
    StoreAdapter, WhereClause,
};
use sift_test_utils::{bike_parts, catalogue, popular_split};

fn ids(data: &[Value]) -> Vec<i64> {
    data.iter().filter_map(|row| row["id"].as_i64()).collect()
}

fn search_fields(descriptors: &[&str]) -> Vec<SearchField> {
    descriptors.iter().map(|d| d.parse().unwrap()).collect()
}

// -------------------------------------------------------------------------
// End-to-end passes
// -------------------------------------------------------------------------

#[tokio::test]
async fn popular_second_page_meta() {
    let bag = ParameterBag::from_json(json!({
        "isPopular": "true",
        "page": "2",
        "limit": "5",
        "sort": "-displayOrder"
    }))
    .unwrap();
    let config = CompilerConfig::default();
    let ctx = RequestContext::new().for_entity("products");
    let allowed = AllowedFields::new(["isPopular"]);

    let response = QueryCompiler::new(InMemoryAdapter::new(popular_split(12, 3)), &bag, &config, &ctx)
        .filter(&allowed)
        .sort()
        .project()
        .paginate()
        .execute()
        .await
        .unwrap();

    assert_eq!(
        response.meta,
        PageMeta {
            total: 12,
            page: 2,
            limit: 5,
            total_pages: 3,
            has_next_page: true,
            has_prev_page: true,
        }
    );
    assert_eq!(ids(&response.data), vec![7, 6, 5, 4, 3]);
}

#[tokio::test]
async fn response_serializes_list_envelope() {
    let bag = ParameterBag::from_query_str("limit=1&sort=id&fields=id");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let response = QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx)
        .sort()
        .project()
        .paginate()
        .execute()
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "data": [{"id": 1}],
            "meta": {
                "total": 20,
                "page": 1,
                "limit": 1,
                "totalPages": 20,
                "hasNextPage": true,
                "hasPrevPage": false
            }
        })
    );
}

#[tokio::test]
async fn count_ignores_pagination_window() {
    let bag = ParameterBag::from_query_str("isPopular=true&page=3&limit=5&sort=id");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let allowed = AllowedFields::new(["isPopular"]);

    let response = QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx)
        .filter(&allowed)
        .sort()
        .paginate()
        .execute()
        .await
        .unwrap();

    // 14 popular rows; page 3 holds the last four.
    assert_eq!(response.meta.total, 14);
    assert_eq!(response.meta.total_pages, 3);
    assert!(!response.meta.has_next_page);
    assert_eq!(ids(&response.data), vec![16, 17, 19, 20]);
}

#[tokio::test]
async fn snapshot_is_independent_of_later_steps() {
    let bag = ParameterBag::from_query_str("page=2&limit=3");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let compiler = QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx).sort();
    let before = compiler.snapshot();
    let compiler = compiler.paginate();

    assert_eq!(before.state().skip, None);
    assert_eq!(before.count().await.unwrap(), 20);
    assert_eq!(compiler.adapter().state().skip, Some(3));
    assert_eq!(compiler.adapter().count().await.unwrap(), 3);
}

#[tokio::test]
async fn concurrent_passes_do_not_share_state() {
    let rows = Arc::new(catalogue());

    let handles: Vec<_> = (1..=4u64)
        .map(|page| {
            let rows = Arc::clone(&rows);
            tokio::spawn(async move {
                let bag = ParameterBag::from_query_str(&format!("page={page}&limit=5&sort=id"));
                let config = CompilerConfig::default();
                let ctx = RequestContext::new();
                QueryCompiler::new(InMemoryAdapter::from_shared(rows), &bag, &config, &ctx)
                    .sort()
                    .paginate()
                    .execute()
                    .await
                    .unwrap()
            })
        })
        .collect();

    for (page, handle) in (1..=4i64).zip(handles) {
        let response = handle.await.unwrap();
        let first = (page - 1) * 5 + 1;
        assert_eq!(ids(&response.data), (first..first + 5).collect::<Vec<_>>());
        assert_eq!(response.meta.total, 20);
    }
}

// -------------------------------------------------------------------------
// Filters
// -------------------------------------------------------------------------

#[tokio::test]
async fn unknown_field_is_dropped_with_diagnostic() {
    let bag = ParameterBag::from_json(json!({"unknownField": "x"})).unwrap();
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let allowed = AllowedFields::new(["name"]);

    let compiler =
        QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx).filter(&allowed);

    assert!(compiler.adapter().state().condition.is_empty());
    assert!(compiler.diagnostics().contains(DiagnosticKind::UnknownField));

    let (response, diagnostics) = compiler.execute_with_diagnostics().await.unwrap();
    assert_eq!(response.meta.total, 20);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics.entries()[0].key, "unknownField");
}

#[tokio::test]
async fn range_filter_from_query_string() {
    let bag = ParameterBag::from_query_str("price[gte]=10&price[lte]=20.5");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let allowed = AllowedFields::new(["price"]);

    let compiler =
        QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx).filter(&allowed);

    assert_eq!(
        serde_json::to_value(&compiler.adapter().state().condition).unwrap(),
        json!({"price": {"gte": 10, "lte": 20.5}})
    );

    // price = id * 2.5 → ids 4..=8
    let response = compiler.execute().await.unwrap();
    assert_eq!(response.meta.total, 5);
}

#[tokio::test]
async fn date_filter_on_named_date_field() {
    let bag = ParameterBag::from_query_str("createdAt[gte]=2024-01-20");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let allowed = AllowedFields::new(["createdAt"]);

    let response = QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx)
        .filter(&allowed)
        .sort_with(&"id".parse::<SortSpec>().unwrap())
        .execute()
        .await
        .unwrap();

    assert_eq!(ids(&response.data), vec![19, 20]);
}

#[tokio::test]
async fn relation_filters() {
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let allowed = AllowedFields::new(["category", "offerings"]);

    let bag = ParameterBag::from_query_str("category.name=Brakes&sort=id");
    let response = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .filter(&allowed)
        .sort()
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&response.data), vec![1, 3]);

    let bag = ParameterBag::from_query_str("offerings[none][title]=Pads&sort=id");
    let response = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .filter(&allowed)
        .sort()
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&response.data), vec![2, 4]);
}

#[tokio::test]
async fn base_condition_is_never_replaced() {
    let base = WhereClause::field("isPopular", FieldCondition::Equals(FilterValue::Boolean(true)));
    let bag = ParameterBag::from_query_str("isPopular=false");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let allowed = AllowedFields::new(["isPopular"]);

    let compiler = QueryCompiler::new(
        InMemoryAdapter::with_base(catalogue(), base),
        &bag,
        &config,
        &ctx,
    )
    .filter(&allowed);

    let condition = &compiler.adapter().state().condition;
    assert_eq!(
        condition.fields.get("isPopular"),
        Some(&FieldCondition::Equals(FilterValue::Boolean(true)))
    );
    assert_eq!(condition.and.len(), 1);

    let response = compiler.execute().await.unwrap();
    assert_eq!(response.meta.total, 0);
}

// -------------------------------------------------------------------------
// Search, sort, projection
// -------------------------------------------------------------------------

#[tokio::test]
async fn search_across_fields() {
    let bag = ParameterBag::from_query_str("search=BRAKE&sort=id");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let response = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .search(&search_fields(&["name", "description"]))
        .sort()
        .execute()
        .await
        .unwrap();

    // "Chain" matches on its description.
    assert_eq!(ids(&response.data), vec![1, 2, 3]);
}

#[tokio::test]
async fn search_through_relations() {
    let bag = ParameterBag::from_query_str("search=rotor");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let response = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .search(&search_fields(&["name", "category.name", "offerings.some.title"]))
        .execute()
        .await
        .unwrap();

    assert_eq!(ids(&response.data), vec![1]);
}

#[tokio::test]
async fn search_without_term_is_noop() {
    let bag = ParameterBag::from_query_str("search=%20%20");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let compiler = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .search(&search_fields(&["name"]));

    assert!(compiler.adapter().state().condition.is_empty());
}

#[tokio::test]
async fn default_sort_applies_when_absent() {
    let bag = ParameterBag::new();
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let response = QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx)
        .sort()
        .paginate()
        .execute()
        .await
        .unwrap();

    // createdAt desc
    assert_eq!(ids(&response.data)[..3], [20, 19, 18]);
}

#[tokio::test]
async fn projection_include_and_exclude() {
    let bag = ParameterBag::from_query_str("fields=name,-id&limit=2&sort=id");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let response = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .sort()
        .project()
        .execute()
        .await
        .unwrap();

    assert_eq!(
        response.data,
        vec![json!({"name": "Disc brake"}), json!({"name": "Chain"})]
    );
}

#[tokio::test]
async fn projection_exclusion_only_returns_rest_of_row() {
    let bag = ParameterBag::from_query_str("fields=-description");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();
    let rows = vec![json!({"id": 1, "name": "Disc", "description": "long"})];

    let compiler = QueryCompiler::new(InMemoryAdapter::new(rows), &bag, &config, &ctx).project();

    assert_eq!(
        serde_json::to_value(&compiler.adapter().state().projection).unwrap(),
        json!({"description": false, "id": true})
    );

    let response = compiler.execute().await.unwrap();
    assert_eq!(response.data, vec![json!({"id": 1, "name": "Disc"})]);
}

#[tokio::test]
async fn projection_nested_path_keeps_id() {
    let bag = ParameterBag::from_query_str("fields=category.name&limit=1&sort=id");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let compiler = QueryCompiler::new(InMemoryAdapter::new(bike_parts()), &bag, &config, &ctx)
        .sort()
        .project();

    let mut expected = ProjectionTree::new();
    expected.insert_path(&["category", "name"], true);
    expected.include_by_default("id");
    assert_eq!(compiler.adapter().state().projection, Some(expected));

    let response = compiler.execute().await.unwrap();
    assert_eq!(
        response.data,
        vec![json!({"id": 1, "category": {"name": "Brakes"}})]
    );
}

#[tokio::test]
async fn invalid_pagination_falls_back() {
    let bag = ParameterBag::from_query_str("page=abc&limit=0");
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let (response, diagnostics) =
        QueryCompiler::new(InMemoryAdapter::new(catalogue()), &bag, &config, &ctx)
            .paginate()
            .execute_with_diagnostics()
            .await
            .unwrap();

    assert_eq!(response.meta.page, 1);
    assert_eq!(response.meta.limit, 100);
    assert_eq!(response.data.len(), 20);
    assert!(diagnostics.contains(DiagnosticKind::InvalidPagination));
}

// -------------------------------------------------------------------------
// Store failures
// -------------------------------------------------------------------------

/// Adapter whose store calls always fail.
#[derive(Clone, Default)]
struct FailingAdapter {
    fail_count: bool,
}

#[async_trait]
impl StoreAdapter for FailingAdapter {
    fn and_where(self, _condition: WhereClause) -> Self {
        self
    }

    fn order_by(self, _sort: SortSpec) -> Self {
        self
    }

    fn select(self, _projection: ProjectionTree) -> Self {
        self
    }

    fn skip(self, _n: u64) -> Self {
        self
    }

    fn limit(self, _n: u64) -> Self {
        self
    }

    async fn count(&self) -> AdapterResult<u64> {
        if self.fail_count {
            Err(AdapterError::Backend("store offline".to_string()))
        } else {
            Ok(3)
        }
    }

    async fn find_many(&self) -> AdapterResult<Vec<Value>> {
        Err(AdapterError::Unsupported("find_many".to_string()))
    }
}

#[tokio::test]
async fn count_failure_propagates() {
    let bag = ParameterBag::new();
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let result = QueryCompiler::new(FailingAdapter { fail_count: true }, &bag, &config, &ctx)
        .paginate()
        .execute()
        .await;

    match result {
        Err(AdapterError::Backend(message)) => assert_eq!(message, "store offline"),
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_failure_propagates() {
    let bag = ParameterBag::new();
    let config = CompilerConfig::default();
    let ctx = RequestContext::new();

    let result = QueryCompiler::new(FailingAdapter::default(), &bag, &config, &ctx)
        .execute()
        .await;

    assert!(matches!(result, Err(AdapterError::Unsupported(_))));
}
