//! Paginated upstream source for one [`EntityRef`].

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::HeaderMap;
use serde_json::Value;
use url::Url;

use super::{Connection, EntityRef, PaginationStyle, PersistMode, Scope};
use crate::cache::parse_iso_date;
use crate::error::SyncError;
use crate::paginator::{FetchedPage, PageRequest};
use crate::repositories::RecordInput;
use crate::transport::connection_headers;

/// [`PageRequest`] for an entity of the catalogue.
#[derive(Debug, Clone)]
pub struct EntityPageRequest {
    entity: EntityRef,
    url: String,
    headers: HeaderMap,
    since: Option<DateTime<Utc>>,
    page_size: u32,
    verify_tls: bool,
}

impl EntityPageRequest {
    /// Build the request. `since` is ignored for full-replace kinds.
    pub fn new(
        entity: EntityRef,
        connection: &Connection,
        since: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Result<Self, SyncError> {
        let url = endpoint_url(&entity, &connection.base_url)?;
        let headers = connection_headers(connection.credential.as_ref())?;
        let since = match entity.kind.persist_mode() {
            PersistMode::Upsert => since,
            PersistMode::Replace => None,
        };

        Ok(Self {
            entity,
            url,
            headers,
            since,
            page_size: page_size.max(1),
            verify_tls: connection.verify_tls,
        })
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    fn item_count(&self, page: &FetchedPage) -> usize {
        items_array(&page.body, self.entity.kind.items_field())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl PageRequest for EntityPageRequest {
    type Item = Value;

    fn entity_key(&self) -> String {
        self.entity.cursor_key()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn params(&self, index: u32, previous: Option<&FetchedPage>) -> Vec<(String, String)> {
        let kind = self.entity.kind;
        let mut params = vec![("api-version".to_string(), kind.api_version().to_string())];

        params.extend(
            kind.static_params()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        if let (Some(param), Some(since)) = (kind.since_param(), self.since) {
            params.push((
                param.to_string(),
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        match kind.pagination() {
            PaginationStyle::Single => {}
            PaginationStyle::Offset {
                top_param,
                skip_param,
            } => {
                params.push((top_param.to_string(), self.page_size.to_string()));
                params.push((
                    skip_param.to_string(),
                    (u64::from(index) * u64::from(self.page_size)).to_string(),
                ));
            }
            PaginationStyle::ContinuationHeader {
                param, top_param, ..
            } => {
                params.push((top_param.to_string(), self.page_size.to_string()));
                if let Some(token) = previous.and_then(|p| p.continuation_token.as_deref()) {
                    params.push((param.to_string(), token.to_string()));
                }
            }
            PaginationStyle::ContinuationBody {
                token_field, param, ..
            } => {
                if let Some(token) = previous.and_then(|p| body_token(&p.body, token_field)) {
                    params.push((param.to_string(), token.to_string()));
                }
            }
        }

        params
    }

    fn headers(&self, _previous: Option<&FetchedPage>) -> HeaderMap {
        self.headers.clone()
    }

    fn has_another_page(&self, _index: u32, page: &FetchedPage) -> bool {
        match self.entity.kind.pagination() {
            PaginationStyle::Single => false,
            PaginationStyle::Offset { .. } => self.item_count(page) >= self.page_size as usize,
            PaginationStyle::ContinuationHeader { .. } => page.continuation_token.is_some(),
            PaginationStyle::ContinuationBody {
                token_field,
                last_batch_field,
                ..
            } => {
                let last_batch = page
                    .body
                    .get(last_batch_field)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                !last_batch && body_token(&page.body, token_field).is_some()
            }
        }
    }

    fn cache_key(&self, index: u32, _previous: Option<&FetchedPage>) -> Vec<String> {
        let window = self
            .since
            .map(|since| since.format("%Y%m%dT%H%M%SZ").to_string())
            .unwrap_or_else(|| "full".to_string());

        vec![
            self.entity.tenant.clone(),
            self.entity.sub_tenant.clone().unwrap_or_else(|| "-".to_string()),
            self.entity.kind.as_str().to_string(),
            self.entity.entity_id.clone().unwrap_or_else(|| "-".to_string()),
            window,
            format!("page-{}", index),
        ]
    }

    fn items(&self, page: &FetchedPage) -> Result<Vec<Value>, SyncError> {
        Ok(items_array(&page.body, self.entity.kind.items_field())
            .cloned()
            .unwrap_or_default())
    }

    fn continuation_header(&self) -> Option<&str> {
        match self.entity.kind.pagination() {
            PaginationStyle::ContinuationHeader { header, .. } => Some(header),
            _ => None,
        }
    }

    fn verify_tls(&self) -> bool {
        self.verify_tls
    }
}

/// Turn an upstream item into a storable record; `None` when it has no key.
pub fn extract_record(entity: &EntityRef, item: Value) -> Option<RecordInput> {
    let kind = entity.kind;
    let mut key_parts = Vec::with_capacity(kind.key_fields().len());
    for field in kind.key_fields() {
        key_parts.push(scalar_text(lookup(&item, field)?)?);
    }

    let source_updated_at = kind
        .timestamp_field()
        .and_then(|field| lookup(&item, field))
        .and_then(Value::as_str)
        .and_then(parse_iso_date);

    Some(RecordInput {
        natural_key: key_parts.join(":"),
        source_updated_at,
        payload: item,
    })
}

fn endpoint_url(entity: &EntityRef, base_url: &str) -> Result<String, SyncError> {
    let project = entity.sub_tenant.as_deref();
    let repository = entity.entity_id.as_deref();

    match entity.kind.scope() {
        Scope::Tenant => {}
        Scope::Project if project.is_none() => {
            return Err(SyncError::Config(format!("{} requires a project", entity)));
        }
        Scope::Repository if project.is_none() || repository.is_none() => {
            return Err(SyncError::Config(format!(
                "{} requires a project and a repository",
                entity
            )));
        }
        _ => {}
    }

    let mut url = Url::parse(base_url)
        .map_err(|e| SyncError::Config(format!("invalid base url '{}': {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::Config(format!("base url '{}' cannot carry a path", base_url)))?
        .pop_if_empty()
        .extend(
            entity
                .kind
                .path_segments(project.unwrap_or_default(), repository.unwrap_or_default()),
        );

    Ok(url.to_string())
}

fn items_array<'a>(body: &'a Value, field: &str) -> Option<&'a Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get(field).and_then(Value::as_array),
        _ => None,
    }
}

fn body_token<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
}

/// Resolve a dotted path. Keys that themselves contain dots
/// (`fields.System.ChangedDate`) are matched before splitting.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    if let Some(found) = object.get(path) {
        return Some(found);
    }
    let (head, rest) = path.split_once('.')?;
    lookup(object.get(head)?, rest)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entities::EntityKind;

    fn connection() -> Connection {
        Connection::new("acme", "https://dev.example.test/acme/")
    }

    fn page(body: Value, token: Option<&str>) -> FetchedPage {
        FetchedPage {
            body,
            continuation_token: token.map(str::to_string),
        }
    }

    fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn builds_percent_encoded_urls() {
        let entity = EntityRef::repository("acme", "Web App", "front end", EntityKind::Commits);
        let request = EntityPageRequest::new(entity, &connection(), None, 100).unwrap();
        assert_eq!(
            request.url(),
            "https://dev.example.test/acme/Web%20App/_apis/git/repositories/front%20end/commits"
        );
    }

    #[test]
    fn rejects_missing_scope_parts() {
        let entity = EntityRef::tenant_wide("acme", EntityKind::Builds);
        assert!(matches!(
            EntityPageRequest::new(entity, &connection(), None, 100),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn offset_pagination_advances_skip() {
        let entity = EntityRef::repository("acme", "Web", "frontend", EntityKind::Commits);
        let since = parse_iso_date("2025-01-02T03:04:05Z");
        let request = EntityPageRequest::new(entity, &connection(), since, 2).unwrap();

        let params = request.params(3, None);
        assert_eq!(param(&params, "searchCriteria.$top"), Some("2"));
        assert_eq!(param(&params, "searchCriteria.$skip"), Some("6"));
        assert_eq!(param(&params, "searchCriteria.fromDate"), Some("2025-01-02T03:04:05Z"));

        let full = page(json!({ "value": [{}, {}] }), None);
        let partial = page(json!({ "value": [{}] }), None);
        assert!(request.has_another_page(0, &full));
        assert!(!request.has_another_page(1, &partial));
    }

    #[test]
    fn header_continuation_echoes_token() {
        let entity = EntityRef::project("acme", "Web", EntityKind::Builds);
        let request = EntityPageRequest::new(entity, &connection(), None, 50).unwrap();
        assert_eq!(request.continuation_header(), Some("x-ms-continuationtoken"));

        let first = page(json!({ "value": [] }), Some("tok-1"));
        assert!(request.has_another_page(0, &first));
        let params = request.params(1, Some(&first));
        assert_eq!(param(&params, "continuationToken"), Some("tok-1"));
        assert_eq!(param(&params, "$top"), Some("50"));

        assert!(!request.has_another_page(1, &page(json!({ "value": [] }), None)));
    }

    #[test]
    fn body_continuation_stops_on_last_batch() {
        let entity = EntityRef::project("acme", "Web", EntityKind::WorkItems);
        let request = EntityPageRequest::new(entity, &connection(), None, 50).unwrap();

        let more = page(json!({ "values": [], "continuationToken": "c1", "isLastBatch": false }), None);
        let last = page(json!({ "values": [], "continuationToken": "c2", "isLastBatch": true }), None);
        assert!(request.has_another_page(0, &more));
        assert!(!request.has_another_page(1, &last));
        assert_eq!(param(&request.params(1, Some(&more)), "continuationToken"), Some("c1"));
    }

    #[test]
    fn replace_kinds_ignore_since() {
        let entity = EntityRef::repository("acme", "Web", "frontend", EntityKind::BranchStats);
        let since = parse_iso_date("2025-01-02T03:04:05Z");
        let request = EntityPageRequest::new(entity, &connection(), since, 100).unwrap();
        assert_eq!(request.since(), None);
        assert_eq!(request.cache_key(0, None)[4], "full");
    }

    #[test]
    fn extracts_composite_keys_and_dotted_timestamps() {
        let entity = EntityRef::project("acme", "Web", EntityKind::WorkItems);
        let record = extract_record(
            &entity,
            json!({
                "id": 42,
                "rev": 3,
                "fields": { "System.ChangedDate": "2025-02-03T04:05:06.789Z" }
            }),
        )
        .unwrap();

        assert_eq!(record.natural_key, "42:3");
        assert_eq!(
            record.source_updated_at,
            parse_iso_date("2025-02-03T04:05:06.789Z")
        );
    }

    #[test]
    fn items_without_key_are_dropped() {
        let entity = EntityRef::repository("acme", "Web", "frontend", EntityKind::Commits);
        assert!(extract_record(&entity, json!({ "comment": "no id" })).is_none());
    }
}
