use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{template_error_body, ApiError};
use crate::assets::{AssetGate, AssetRef, EntityStore, KindRegistry};
use crate::cache::ParametersCache;
use crate::config::Config;
use crate::db::{Db, SqliteStore};
use crate::error::{ImpactError, Result};
use crate::graph::{
    audit, load_context, log_summary, save_context, DeltaOperation, GraphBuilder, GraphPayload,
    ImpactContext, OperationReport,
};
use crate::template::{
    builtin_schemas, AvailableParameter, SchemaRegistry, TemplateEngine, ValidationFailure,
};

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    db: Arc<Db>,
    registry: Arc<KindRegistry>,
    allowed_kinds: Arc<Vec<String>>,
    schemas: Arc<SchemaRegistry>,
    parameters: Arc<ParametersCache>,
    engine: TemplateEngine,
    max_value_depth: usize,
}

impl AppState {
    pub fn new(db: Db, config: &Config) -> Self {
        Self {
            db: Arc::new(db),
            registry: Arc::new(KindRegistry::builtin()),
            allowed_kinds: Arc::new(config.assets.allowed_kinds.clone()),
            schemas: Arc::new(builtin_schemas()),
            parameters: Arc::new(ParametersCache::new(config.templates.parameters_cache_capacity)),
            engine: TemplateEngine::new(config.templates.output_mode),
            max_value_depth: config.templates.max_value_depth,
        }
    }

    fn ensure_known_kind(&self, kind: &str) -> Result<()> {
        match self.registry.resolve(kind) {
            Some(_) => Ok(()),
            None => Err(ImpactError::NotFound(format!("Unknown kind {}", kind))),
        }
    }

    /// Value tree of the entity, wrapped under its schema's root key.
    async fn template_values(&self, asset: AssetRef) -> Result<Value> {
        self.ensure_known_kind(&asset.kind)?;
        let schema = self
            .schemas
            .for_kind(&asset.kind)
            .ok_or_else(|| ImpactError::NotFound(format!("No template parameters for {}", asset.kind)))?;
        let max_depth = self.max_value_depth;

        self.db
            .with_connection(move |conn| {
                let store = SqliteStore::new(conn);
                let entity = store
                    .load(&asset)?
                    .ok_or_else(|| ImpactError::NotFound(format!("Unknown entity {}", asset)))?;
                let values = schema.get_values(&entity, true, &store, max_depth)?;
                Ok(Value::Object(values))
            })
            .await
    }
}

/// HTTP server wrapper
pub struct ImpactServer {
    state: AppState,
    allowed_origins: Vec<String>,
}

impl ImpactServer {
    pub fn new(db: Db, config: &Config) -> Self {
        Self {
            state: AppState::new(db, config),
            allowed_origins: config.http_server.allowed_origins.clone(),
        }
    }

    /// Run the HTTP server
    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            ImpactError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to bind to {}: {}. Set http_server.port in config.toml to use another port.",
                    addr, e
                ),
            ))
        })?;
        log::info!("Impact graph service listening on http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| ImpactError::Io(std::io::Error::other(format!("HTTP server error: {}", e))))?;

        Ok(())
    }

    /// Create the axum router
    pub fn router(&self) -> Router {
        // Any origin when none is configured (local use)
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(handle_health))
            .route("/graph", get(handle_graph))
            .route("/graph/delta", post(handle_delta))
            .route("/graph/context", get(handle_get_context).put(handle_put_context))
            .route("/templates/parameters/:kind", get(handle_parameters))
            .route("/templates/render", post(handle_render))
            .route("/templates/validate", post(handle_validate))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AssetQuery {
    kind: Option<String>,
    id: Option<String>,
}

impl AssetQuery {
    fn asset_ref(&self) -> Result<AssetRef> {
        let kind = self
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ImpactError::Validation("Missing asset kind".to_string()))?;
        let id = self
            .id
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ImpactError::Validation("Missing asset id".to_string()))?;
        let id = id
            .parse::<i64>()
            .map_err(|_| ImpactError::Validation(format!("Invalid asset id: {}", id)))?;
        Ok(AssetRef::new(kind, id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest {
    template_content: String,
    #[serde(default)]
    context_entity_ref: Option<AssetRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest {
    template_content: String,
}

#[derive(Debug, Serialize)]
struct AvailableParametersResponse {
    kind: String,
    parameters: AvailableParameter,
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "impactgraph",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

/// Graph around a start asset. The start asset must pass the existence gate.
async fn handle_graph(
    State(state): State<AppState>,
    Query(query): Query<AssetQuery>,
) -> ApiResult<Json<GraphPayload>> {
    let start = query.asset_ref()?;
    let registry = Arc::clone(&state.registry);
    let allowed = Arc::clone(&state.allowed_kinds);

    let payload = state
        .db
        .with_connection(move |conn| {
            let store = SqliteStore::new(conn);
            let gate = AssetGate::new(&registry, &allowed, &store);
            let entity = gate
                .resolve(&start)
                .ok_or_else(|| ImpactError::Validation(format!("Unknown asset {}", start)))?;
            let graph = GraphBuilder::new(&store, &gate)
                .with_work_items(&store)
                .build(&entity)?;
            Ok(graph.to_payload())
        })
        .await?;

    Ok(Json(payload))
}

/// Apply an ordered delta. Each operation stands alone and is committed with
/// its audit row; a store failure is reported on its operation.
async fn handle_delta(
    State(state): State<AppState>,
    Json(operations): Json<Vec<DeltaOperation>>,
) -> ApiResult<Json<Vec<OperationReport>>> {
    let registry = Arc::clone(&state.registry);
    let allowed = Arc::clone(&state.allowed_kinds);

    let reports = state
        .db
        .with_connection(move |conn| {
            let conn: &rusqlite::Connection = conn;
            let store = SqliteStore::new(conn);
            let gate = AssetGate::new(&registry, &allowed, &store);
            let reports: Vec<OperationReport> = operations
                .iter()
                .enumerate()
                .map(|(index, operation)| audit::apply_recorded(conn, &store, &gate, index, operation))
                .collect();
            log_summary(&reports);
            Ok(reports)
        })
        .await?;

    Ok(Json(reports))
}

async fn handle_get_context(
    State(state): State<AppState>,
    Query(query): Query<AssetQuery>,
) -> ApiResult<Json<ImpactContext>> {
    let asset = query.asset_ref()?;
    state.ensure_known_kind(&asset.kind)?;
    let context = state
        .db
        .with_connection(move |conn| load_context(conn, &asset))
        .await?;
    Ok(Json(context))
}

async fn handle_put_context(
    State(state): State<AppState>,
    Json(context): Json<ImpactContext>,
) -> ApiResult<Json<ImpactContext>> {
    state.ensure_known_kind(&context.kind)?;
    context.validate()?;
    let saved = context.clone();
    state
        .db
        .with_connection(move |conn| save_context(conn, &saved))
        .await?;
    Ok(Json(context))
}

async fn handle_parameters(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<AvailableParametersResponse>> {
    let parameters = state
        .parameters
        .get_or_compute(&kind, || {
            state
                .schemas
                .for_kind(&kind)
                .map(|schema| schema.compute_available_parameters())
        })
        .ok_or_else(|| ImpactError::NotFound(format!("No template parameters for {}", kind)))?;
    Ok(Json(AvailableParametersResponse { kind, parameters }))
}

async fn handle_render(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> ApiResult<Json<Value>> {
    let values = match request.context_entity_ref {
        Some(asset) => state.template_values(asset).await?,
        None => Value::Object(Map::new()),
    };
    let engine = state.engine;
    let rendered = run_template(move || engine.render(&request.template_content, &values)).await?;
    let content = rendered.map_err(ImpactError::from)?;
    Ok(Json(json!({ "content": content })))
}

/// Templates are user input; parsing and rendering run on the blocking pool.
async fn run_template<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ImpactError::Unexpected(format!("Template task failed: {}", e)))
}

async fn handle_validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Response> {
    let engine = state.engine;
    let outcome: std::result::Result<(), ValidationFailure> =
        run_template(move || engine.validate(&request.template_content)).await?;
    Ok(match outcome {
        Ok(()) => (StatusCode::OK, Json(json!({ "valid": true }))).into_response(),
        Err(failure) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "valid": false,
                "content": failure.content,
                "error": template_error_body(&failure.error),
            })),
        )
            .into_response(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Entity;
    use crate::config::{AssetsConfig, HttpServerConfig, ImpactConfig, TemplatesConfig};
    use crate::db::migrate;
    use crate::graph::{Relation, RelationStore};
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _temp_dir: TempDir,
        db_path: std::path::PathBuf,
        router: Router,
    }

    fn computer(id: i64) -> Entity {
        Entity {
            kind: "Computer".to_string(),
            id,
            name: format!("pc-{}", id),
            fields: Map::new(),
        }
    }

    fn harness() -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("impact.db");
        let db = Db::new(&db_path);
        let mut conn = db.open_connection().unwrap();
        let migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        migrate::run_migrations(&mut conn, &migrations).unwrap();
        {
            let store = SqliteStore::new(&conn);
            for id in 1..=3 {
                store.upsert_entity(&computer(id)).unwrap();
            }
            store
                .insert(&Relation::new(AssetRef::new("Computer", 1), AssetRef::new("Computer", 2)))
                .unwrap();
            store
                .insert(&Relation::new(AssetRef::new("Computer", 2), AssetRef::new("Computer", 3)))
                .unwrap();
        }

        let config = Config {
            impact: ImpactConfig {
                db_path: db_path.clone(),
                log_level: "debug".to_string(),
                migrations_dir: migrations,
            },
            assets: AssetsConfig::default(),
            templates: TemplatesConfig::default(),
            http_server: HttpServerConfig::default(),
        };
        let router = ImpactServer::new(db, &config).router();
        Harness {
            _temp_dir: temp_dir,
            db_path,
            router,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn flag_of(payload: &Value, from: &str, to: &str) -> Option<u64> {
        payload["edges"]
            .as_array()?
            .iter()
            .find(|e| e["from"] == from && e["to"] == to)?["directionFlag"]
            .as_u64()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = send(&h.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_graph_fetch_from_middle() {
        let h = harness();
        let (status, body) = send(&h.router, "GET", "/graph?kind=Computer&id=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(flag_of(&body, "Computer::1", "Computer::2"), Some(2));
        assert_eq!(flag_of(&body, "Computer::2", "Computer::3"), Some(1));
    }

    #[tokio::test]
    async fn test_graph_fetch_rejects_bad_requests() {
        let h = harness();
        for uri in [
            "/graph?id=1",
            "/graph?kind=Computer",
            "/graph?kind=Computer&id=abc",
            "/graph?kind=Computer&id=99",
            "/graph?kind=Ticket&id=1",
        ] {
            let (status, _) = send(&h.router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_delta_applies_in_order_and_audits() {
        let h = harness();
        let body = json!([
            {"action": "add", "sourceKind": "Computer", "sourceId": 3, "targetKind": "Computer", "targetId": 1},
            {"action": "add", "sourceKind": "Computer", "sourceId": 1, "targetKind": "Computer", "targetId": 1},
            {"action": "frobnicate", "sourceKind": "Computer", "sourceId": 1, "targetKind": "Computer", "targetId": 2},
            {"action": "delete", "sourceKind": "Computer", "sourceId": 1, "targetKind": "Computer", "targetId": 2},
        ]);
        let (status, reports) = send(&h.router, "POST", "/graph/delta", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        let statuses: Vec<&str> = reports
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["applied", "rejected", "skipped", "applied"]);
        assert_eq!(reports[1]["reason"], "link to self");

        let (_, graph) = send(&h.router, "GET", "/graph?kind=Computer&id=1", None).await;
        assert_eq!(flag_of(&graph, "Computer::3", "Computer::1"), Some(2));
        assert_eq!(flag_of(&graph, "Computer::1", "Computer::2"), None);

        let conn = Db::new(&h.db_path).open_connection().unwrap();
        assert_eq!(audit::recent_operations(&conn, 10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delta_store_failure_reports_each_operation() {
        let h = harness();
        Db::new(&h.db_path)
            .open_connection()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_computer_3 BEFORE INSERT ON asset_relations
                 WHEN NEW.target_id = 3 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let body = json!([
            {"action": "add", "sourceKind": "Computer", "sourceId": 3, "targetKind": "Computer", "targetId": 1},
            {"action": "add", "sourceKind": "Computer", "sourceId": 1, "targetKind": "Computer", "targetId": 3},
            {"action": "delete", "sourceKind": "Computer", "sourceId": 1, "targetKind": "Computer", "targetId": 2},
        ]);
        let (status, reports) = send(&h.router, "POST", "/graph/delta", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        let statuses: Vec<&str> = reports
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["applied", "failed", "applied"]);
        assert_eq!(reports[1]["reason"], "store failure");

        let (_, graph) = send(&h.router, "GET", "/graph?kind=Computer&id=1", None).await;
        assert_eq!(flag_of(&graph, "Computer::3", "Computer::1"), Some(2));
        assert_eq!(flag_of(&graph, "Computer::1", "Computer::3"), None);
        assert_eq!(flag_of(&graph, "Computer::1", "Computer::2"), None);

        let conn = Db::new(&h.db_path).open_connection().unwrap();
        let entries = audit::recent_operations(&conn, 10).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|e| e.success).count(), 2);
    }

    #[tokio::test]
    async fn test_runaway_template_is_rejected() {
        let h = harness();
        let deep = format!("{{{{ {}1{} }}}}", "[".repeat(20_000), "]".repeat(20_000));
        let (status, body) = send(
            &h.router,
            "POST",
            "/templates/validate",
            Some(json!({"templateContent": deep})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "syntax");

        let loops = "{% for a in 1..9999 %}{% for b in 1..9999 %}xxxxxxxx{% endfor %}{% endfor %}";
        let (status, body) = send(
            &h.router,
            "POST",
            "/templates/render",
            Some(json!({"templateContent": loops})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "syntax");
    }

    #[tokio::test]
    async fn test_context_round_trip() {
        let h = harness();
        let (status, context) = send(&h.router, "GET", "/graph/context?kind=Computer&id=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(context["zoom"], 1.0);

        let mut updated = context.clone();
        updated["zoom"] = json!(2.5);
        updated["maxDepth"] = json!(2);
        let (status, _) = send(&h.router, "PUT", "/graph/context", Some(updated)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, reloaded) = send(&h.router, "GET", "/graph/context?kind=Computer&id=1", None).await;
        assert_eq!(reloaded["zoom"], 2.5);
        assert_eq!(reloaded["maxDepth"], 2);

        let mut bad = context;
        bad["forwardColor"] = json!("red");
        let (status, _) = send(&h.router, "PUT", "/graph/context", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&h.router, "GET", "/graph/context?kind=Spaceship&id=1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_available_parameters() {
        let h = harness();
        let (status, body) = send(&h.router, "GET", "/templates/parameters/Ticket", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "Ticket");
        assert_eq!(body["parameters"]["key"], "ticket");

        let (status, _) = send(&h.router, "GET", "/templates/parameters/Spaceship", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_render_against_entity() {
        let h = harness();
        let body = json!({
            "templateContent": "{{ asset.name|upper }} has {{ asset.location is defined ? 'a' : 'no' }} location",
            "contextEntityRef": {"kind": "Computer", "id": 1},
        });
        let (status, rendered) = send(&h.router, "POST", "/templates/render", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rendered["content"], "PC-1 has no location");

        let body = json!({
            "templateContent": "{{ asset.name }}",
            "contextEntityRef": {"kind": "Computer", "id": 42},
        });
        let (status, _) = send(&h.router, "POST", "/templates/render", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_render_policy_violation() {
        let h = harness();
        let body = json!({"templateContent": "{% set y = 1 %}"});
        let (status, rendered) = send(&h.router, "POST", "/templates/render", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(rendered["content"], "");
        assert_eq!(rendered["error"]["kind"], "policy_violation");
        assert_eq!(rendered["error"]["construct"], "tag \"set\"");
    }

    #[tokio::test]
    async fn test_validate_echoes_content() {
        let h = harness();
        let (status, body) = send(
            &h.router,
            "POST",
            "/templates/validate",
            Some(json!({"templateContent": "{{ ticket.name }}"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);

        let (status, body) = send(
            &h.router,
            "POST",
            "/templates/validate",
            Some(json!({"templateContent": "{{ ticket.name "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["content"], "{{ ticket.name ");
        assert_eq!(body["error"]["message"], "Invalid template syntax");
    }
}
