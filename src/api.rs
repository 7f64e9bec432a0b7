//! HTTP surface.
//!
//! Read-only JSON routes under `/novel`. Successful calls return the DTO with
//! status 200; failures, including malformed paths and query strings, return
//! the status of their [`ErrorKind`] and a `{"message": ...}` body.

use crate::error::{ErrorKind, ServiceError};
use crate::models::ListSort;
use crate::providers::RankOptions;
use crate::service::{BookEpisodeDto, BookMetadataDto, BookPageDto, BookStateDto, NovelService};
use anyhow::Result;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NovelService>,
    pub page_size: usize,
    pub rank_max_age_sec: u64,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => {
                tracing::error!("Internal error: {}", self.message);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::new(ErrorKind::BadRequest, rejection.body_text())
    }
}

impl From<PathRejection> for ServiceError {
    fn from(rejection: PathRejection) -> Self {
        ServiceError::new(ErrorKind::BadRequest, rejection.body_text())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: i64,
    pub provider: Option<String>,
    #[serde(default)]
    pub sort: ListSort,
}

/// Collects query pairs into rank options. A repeated key keeps its first value.
fn rank_options(pairs: Vec<(String, String)>) -> RankOptions {
    let mut options = RankOptions::new();
    for (key, value) in pairs {
        options.entry(key).or_insert(value);
    }
    options
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/novel/list", get(list))
        .route("/novel/rank/{provider_id}", get(rank))
        .route("/novel/state/{provider_id}/{book_id}", get(book_state))
        .route("/novel/metadata/{provider_id}/{book_id}", get(metadata))
        .route(
            "/novel/episode/{provider_id}/{book_id}/{episode_id}",
            get(episode),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves the router until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<BookPageDto>, ServiceError> {
    let Query(query) = query?;
    let page = state
        .service
        .list(
            query.page,
            state.page_size,
            query.provider.as_deref(),
            query.sort,
        )
        .await?;
    Ok(Json(page))
}

async fn rank(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Path(provider_id) = path?;
    let Query(pairs) = query?;

    let page = state
        .service
        .list_rank(&provider_id, &rank_options(pairs))
        .await?;
    Ok((
        [(
            header::CACHE_CONTROL,
            format!("max-age={}", state.rank_max_age_sec),
        )],
        Json(page),
    ))
}

async fn book_state(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<BookStateDto>, ServiceError> {
    let Path((provider_id, book_id)) = path?;
    Ok(Json(state.service.get_state(&provider_id, &book_id).await?))
}

async fn metadata(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<BookMetadataDto>, ServiceError> {
    let Path((provider_id, book_id)) = path?;
    Ok(Json(state.service.get_metadata(&provider_id, &book_id).await?))
}

async fn episode(
    State(state): State<AppState>,
    path: Result<Path<(String, String, String)>, PathRejection>,
) -> Result<Json<BookEpisodeDto>, ServiceError> {
    let Path((provider_id, book_id, episode_id)) = path?;
    let dto = state
        .service
        .get_episode(&provider_id, &book_id, &episode_id)
        .await?;
    Ok(Json(dto))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::FakeProvider;
    use crate::providers::{ProviderRegistry, RemoteListing};
    use crate::store::testing::{book, chapter, episode as stored_episode, heading};
    use crate::store::{EpisodeStore, MemoryEpisodeStore, MemoryMetadataStore, MetadataStore};
    use serde_json::Value as JsonValue;

    async fn state_with(provider: Arc<FakeProvider>) -> AppState {
        let mut registry = ProviderRegistry::new();
        registry.register_shared(provider);
        let metadata = Arc::new(MemoryMetadataStore::new(Arc::new(registry)));
        let episodes = Arc::new(MemoryEpisodeStore::new());

        metadata
            .upsert(book(
                "syosetu",
                "n1",
                1,
                vec![heading("Vol.1"), chapter("Ch.1", "1"), chapter("Ch.2", "2")],
            ))
            .await
            .unwrap();
        episodes
            .upsert(stored_episode("syosetu", "n1", "1", false))
            .await
            .unwrap();

        AppState {
            service: Arc::new(NovelService::new(metadata, episodes)),
            page_size: 10,
            rank_max_age_sec: 7200,
        }
    }

    async fn state() -> AppState {
        state_with(Arc::new(FakeProvider::default())).await
    }

    /// Serves the router on an ephemeral port and returns its base URL.
    async fn spawn_app(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    /// Client for the local test server; ambient proxy settings are ignored.
    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn get_json(url: &str) -> (StatusCode, Option<String>, JsonValue) {
        let response = client().get(url).send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.json::<JsonValue>().await.unwrap();
        (status, content_type, body)
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ErrorKind::BadRequest, StatusCode::BAD_REQUEST),
            (ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED),
            (ErrorKind::NotFound, StatusCode::NOT_FOUND),
            (ErrorKind::Conflict, StatusCode::CONFLICT),
            (ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            let response = ServiceError::new(kind, "boom").into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_list_query_defaults() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, 0);
        assert_eq!(query.provider, None);
        assert_eq!(query.sort, ListSort::Created);

        let query: ListQuery = serde_json::from_str(r#"{"page":-2,"sort":"visited"}"#).unwrap();
        assert_eq!(query.page, -2);
        assert_eq!(query.sort, ListSort::Visited);
    }

    #[test]
    fn test_rank_options_keep_first_value() {
        let options = rank_options(vec![
            ("type".to_string(), "weekly".to_string()),
            ("genre".to_string(), String::new()),
            ("type".to_string(), "daily".to_string()),
        ]);
        assert_eq!(options.len(), 2);
        assert_eq!(options["type"], "weekly");
        assert_eq!(options["genre"], "");
    }

    #[tokio::test]
    async fn test_list_handler() {
        let Json(page) = list(State(state().await), Ok(Query(ListQuery::default())))
            .await
            .unwrap();
        assert_eq!(page.page_number, 0);
        assert_eq!(page.items[0].extra, "Original(1/2) Translated(0/2)");
    }

    #[tokio::test]
    async fn test_episode_handler() {
        let Json(dto) = episode(
            State(state().await),
            Ok(Path((
                "syosetu".to_string(),
                "n1".to_string(),
                "1".to_string(),
            ))),
        )
        .await
        .unwrap();
        assert_eq!(dto.prev_id, None);
        assert_eq!(dto.next_id.as_deref(), Some("2"));

        let err = episode(
            State(state().await),
            Ok(Path((
                "syosetu".to_string(),
                "n1".to_string(),
                "7".to_string(),
            ))),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_routes_serve_camel_case_json() {
        let base = spawn_app(state().await).await;

        let (status, _, body) = get_json(&format!("{}/novel/list?page=-1", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pageNumber"], 0);
        assert_eq!(body["items"][0]["bookId"], "n1");

        let (status, _, body) = get_json(&format!("{}/novel/state/syosetu/n1", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["countOriginal"], 1);

        let (status, _, body) = get_json(&format!("{}/novel/metadata/syosetu/n1", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["titleOriginal"], "n1 title");
        assert!(body["syncAt"].is_i64());

        let (status, _, body) = get_json(&format!("{}/novel/episode/syosetu/n1/1", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["prevId"].is_null());
        assert_eq!(body["nextId"], "2");
        assert_eq!(body["paragraphsOriginal"][0], "1 original");
    }

    #[tokio::test]
    async fn test_malformed_query_gets_json_error() {
        let base = spawn_app(state().await).await;

        for query in ["sort=bogus", "page=abc"] {
            let (status, content_type, body) =
                get_json(&format!("{}/novel/list?{}", base, query)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(content_type.as_deref(), Some("application/json"));
            assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
        }
    }

    #[tokio::test]
    async fn test_missing_book_gets_json_404() {
        let base = spawn_app(state().await).await;

        let (status, _, body) = get_json(&format!("{}/novel/metadata/syosetu/n404", base)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "book syosetu/n404 not found");

        let (status, _, body) = get_json(&format!("{}/novel/rank/hameln", base)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("hameln"));
    }

    #[tokio::test]
    async fn test_rank_forwards_query_verbatim() {
        let provider = Arc::new(FakeProvider {
            listings: vec![RemoteListing {
                novel_id: "n9".to_string(),
                title: "ranked".to_string(),
                meta: "writer".to_string(),
            }],
            ..FakeProvider::default()
        });
        let base = spawn_app(state_with(provider.clone()).await).await;

        let response = client()
            .get(format!(
                "{}/novel/rank/fake?type=weekly&genre=&q=%E9%AD%94%E7%8E%8B&type=daily",
                base
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers()[reqwest::header::CACHE_CONTROL],
            "max-age=7200"
        );
        let body: JsonValue = response.json().await.unwrap();
        assert_eq!(body["pageNumber"], 1);
        assert_eq!(body["items"][0]["bookId"], "n9");

        let expected = RankOptions::from([
            ("type".to_string(), "weekly".to_string()),
            ("genre".to_string(), String::new()),
            ("q".to_string(), "魔王".to_string()),
        ]);
        assert_eq!(*provider.seen_options.lock().unwrap(), vec![expected]);
    }
}
