//! Elasticsearch Query DSL builder.
//!
//! Translates a [`SearchRequest`] into a search body. Scoring constraints go
//! into `query`; filters are folded into a `bool` query when facets are
//! requested (aggregations must see the filtered set) or when there is nothing
//! to score, and are applied as `post_filter` otherwise.

use serde_json::{Map, Value, json};

use crate::core::{SearchRequest, SortDirection};
use crate::query::Constraint;

/// Translates a single constraint.
pub fn constraint_to_dsl(constraint: &Constraint) -> Value {
    match constraint {
        Constraint::FieldEqual { field, value } => json!({ "term": { field: value } }),
        Constraint::FieldNotEqual { field, value } => json!({
            "bool": { "must_not": [ { "term": { field: value } } ] }
        }),
        Constraint::Filled { field } => json!({ "exists": { "field": field } }),
        Constraint::NotFilled { field } => json!({
            "bool": { "must_not": [ { "exists": { "field": field } } ] }
        }),
        Constraint::OneInField { field, values } => json!({ "terms": { field: values } }),
        Constraint::Range {
            field,
            lower,
            upper,
            inclusive,
        } => {
            let (lo, hi) = if *inclusive { ("gte", "lte") } else { ("gt", "lt") };
            let mut bounds = Map::new();
            if let Some(lower) = lower {
                bounds.insert(lo.to_string(), lower.clone());
            }
            if let Some(upper) = upper {
                bounds.insert(hi.to_string(), upper.clone());
            }
            json!({ "range": { field: bounds } })
        }
        Constraint::Prefix { field, value } => json!({ "prefix": { field: value } }),
        Constraint::QueryString { text } => json!({
            "query_string": { "query": text, "default_operator": "AND" }
        }),
        Constraint::And(constraints) => json!({
            "bool": { "must": constraints.iter().map(constraint_to_dsl).collect::<Vec<_>>() }
        }),
        Constraint::Or(constraints) => json!({
            "bool": {
                "should": constraints.iter().map(constraint_to_dsl).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
        Constraint::Not(constraint) => json!({
            "bool": { "must_not": [ constraint_to_dsl(constraint) ] }
        }),
    }
}

fn filters(request: &SearchRequest) -> Vec<Value> {
    request.filters.iter().map(constraint_to_dsl).collect()
}

/// Builds a query with scoring part and filters folded together.
pub fn build_query(request: &SearchRequest) -> Value {
    let filters = filters(request);
    match (&request.query, filters.is_empty()) {
        (None, true) => json!({ "match_all": {} }),
        (None, false) => json!({ "bool": { "filter": filters } }),
        (Some(query), true) => constraint_to_dsl(query),
        (Some(query), false) => json!({
            "bool": { "must": [ constraint_to_dsl(query) ], "filter": filters }
        }),
    }
}

/// Builds the complete search body, including paging.
pub fn build_search(request: &SearchRequest) -> Value {
    let mut body = json!({
        "version": true,
        "track_total_hits": true,
        "from": request.from,
        "size": request.size,
    });
    let query = build_search_query(request, &mut body);
    body["query"] = query;

    if let Some(seed) = request.random_seed {
        body["query"] = json!({
            "function_score": {
                "query": body["query"].take(),
                "random_score": { "seed": seed, "field": "_seq_no" },
                "boost_mode": "replace"
            }
        });
    } else if !request.sort.is_empty() {
        body["sort"] = build_sort(request);
    }

    if !request.facets.is_empty() {
        let aggs: Map<String, Value> = request
            .facets
            .iter()
            .map(|facet| {
                (
                    facet.field.clone(),
                    json!({ "terms": { "field": facet.field, "size": facet.size } }),
                )
            })
            .collect();
        body["aggs"] = Value::Object(aggs);
    }
    body
}

/// Builds the body that opens a scroll; paging is replaced by the batch size.
pub fn build_scroll(request: &SearchRequest, batch_size: usize) -> Value {
    let mut body = build_search(request);
    if let Some(map) = body.as_object_mut() {
        map.remove("from");
        map.remove("aggs");
        map.remove("post_filter");
        map.insert("size".to_string(), json!(batch_size));
        map.insert("query".to_string(), build_query(request));
        if !map.contains_key("sort") && request.random_seed.is_none() {
            map.insert("sort".to_string(), json!(["_doc"]));
        }
    }
    if let Some(seed) = request.random_seed {
        body["query"] = json!({
            "function_score": {
                "query": body["query"].take(),
                "random_score": { "seed": seed, "field": "_seq_no" },
                "boost_mode": "replace"
            }
        });
    }
    body
}

fn build_search_query(request: &SearchRequest, body: &mut Value) -> Value {
    match &request.query {
        Some(query) if request.facets.is_empty() && !request.filters.is_empty() => {
            body["post_filter"] = json!({ "bool": { "filter": filters(request) } });
            constraint_to_dsl(query)
        }
        _ => build_query(request),
    }
}

fn build_sort(request: &SearchRequest) -> Value {
    Value::Array(
        request
            .sort
            .iter()
            .map(|order| {
                let direction = match order.direction {
                    SortDirection::Ascending => "asc",
                    SortDirection::Descending => "desc",
                };
                json!({
                    order.field.clone(): {
                        "order": direction,
                        "missing": "_last",
                        "unmapped_type": "keyword"
                    }
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::{FacetRequest, SortOrder};

    fn request() -> SearchRequest {
        let mut request = SearchRequest::new("crm-customer");
        request.filters = vec![Constraint::eq("status", "active")];
        request
    }

    #[test]
    fn test_filters_only() {
        let body = build_search(&request());
        assert_eq!(
            body["query"],
            json!({ "bool": { "filter": [ { "term": { "status": "active" } } ] } })
        );
        assert!(body.get("post_filter").is_none());
        assert_eq!(body["version"], true);
    }

    #[test]
    fn test_query_without_facets_uses_post_filter() {
        let mut request = request();
        request.query = Some(Constraint::query_string("smith"));
        let body = build_search(&request);
        assert_eq!(body["query"]["query_string"]["query"], "smith");
        assert_eq!(
            body["post_filter"]["bool"]["filter"][0]["term"]["status"],
            "active"
        );
    }

    #[test]
    fn test_query_with_facets_folds_filters() {
        let mut request = request();
        request.query = Some(Constraint::query_string("smith"));
        request.facets = vec![FacetRequest {
            field: "country".to_string(),
            size: 25,
        }];
        let body = build_search(&request);
        assert!(body.get("post_filter").is_none());
        assert_eq!(body["query"]["bool"]["must"][0]["query_string"]["query"], "smith");
        assert_eq!(body["query"]["bool"]["filter"][0]["term"]["status"], "active");
        assert_eq!(body["aggs"]["country"]["terms"]["size"], 25);
    }

    #[test]
    fn test_random_overrides_sort() {
        let mut request = request();
        request.sort = vec![SortOrder {
            field: "name".to_string(),
            direction: SortDirection::Ascending,
        }];
        request.random_seed = Some(42);
        let body = build_search(&request);
        assert!(body.get("sort").is_none());
        assert_eq!(body["query"]["function_score"]["random_score"]["seed"], 42);
    }

    #[test]
    fn test_sort() {
        let mut request = request();
        request.sort = vec![SortOrder {
            field: "name".to_string(),
            direction: SortDirection::Descending,
        }];
        let body = build_search(&request);
        assert_eq!(body["sort"][0]["name"]["order"], "desc");
    }

    #[test]
    fn test_constraints() {
        assert_eq!(
            constraint_to_dsl(&Constraint::range("n", Some(1), None::<i64>)),
            json!({ "range": { "n": { "gte": 1 } } })
        );
        assert_eq!(
            constraint_to_dsl(&Constraint::or(vec![
                Constraint::eq("a", 1),
                Constraint::not_filled("b")
            ])),
            json!({
                "bool": {
                    "should": [
                        { "term": { "a": 1 } },
                        { "bool": { "must_not": [ { "exists": { "field": "b" } } ] } }
                    ],
                    "minimum_should_match": 1
                }
            })
        );
    }

    #[test]
    fn test_scroll_body() {
        let body = build_scroll(&request(), 10);
        assert_eq!(body["size"], 10);
        assert!(body.get("from").is_none());
        assert_eq!(body["sort"], json!(["_doc"]));
    }
}
