//! HTTP façade over the generator and the store.
//!
//! Every JSON endpoint answers `200 OK` and reports failures in the body as
//! `{"success": false, "error": "..."}`; nothing a request does can take the
//! process down.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::HackviewConfig;
use crate::store::{branch_id, generated_id, uploaded_id, TrajectoryStore};
use crate::trajectory::{Trajectory, TrajectoryError, TrajectoryGenerator};

const INDEX_HTML: &str = include_str!("../assets/index.html");

const NOT_FOUND: &str = "Trajectory not found";
const STEP_OUT_OF_RANGE: &str = "Step number out of range";

#[derive(Clone)]
pub struct AppState {
    pub store: TrajectoryStore,
    pub generator: Arc<TrajectoryGenerator>,
    pub config: Arc<HackviewConfig>,
}

impl AppState {
    pub fn new(
        store: TrajectoryStore,
        generator: TrajectoryGenerator,
        config: HackviewConfig,
    ) -> Self {
        Self {
            store,
            generator: Arc::new(generator),
            config: Arc::new(config),
        }
    }

    fn env_or_default(&self, env_name: Option<String>) -> String {
        env_name.unwrap_or_else(|| self.config.env.default_env_id.clone())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/upload", post(upload))
        .route("/trajectories", get(list_trajectories))
        .route("/trajectory/{id}", get(get_trajectory))
        .route("/trajectory/{id}/step/{step}", get(get_step))
        .route("/trajectory/{id}/continue", post(continue_trajectory))
        .route("/live-generate", get(live_generate))
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Starting NetHack trajectory viewer");
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

fn failure(error: impl ToString) -> Json<Value> {
    Json(json!({ "success": false, "error": error.to_string() }))
}

/// Requested step counts arrive signed; a negative count asks for nothing.
fn step_count(requested: i64) -> usize {
    usize::try_from(requested).unwrap_or(0)
}

/// Run a generation on its own task. It then finishes and releases its
/// environment even when the client disconnects and the handler is dropped.
async fn run_detached<F>(work: F) -> Result<Trajectory, String>
where
    F: Future<Output = Result<Trajectory, TrajectoryError>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(err) => Err(format!("generation task failed: {err}")),
    }
}

fn stored(id: &str, length: usize, message: String) -> Json<Value> {
    Json(json!({
        "success": true,
        "trajectory_id": id,
        "length": length,
        "message": message,
    }))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<AppState>) -> Html<String> {
    if let Some(dir) = &state.config.server.assets_dir {
        let path = FsPath::new(dir).join("index.html");
        match tokio::fs::read_to_string(&path).await {
            Ok(page) => return Html(page),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Serving built-in viewer page")
            }
        }
    }
    Html(INDEX_HTML.to_string())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GenerateForm {
    steps: Option<i64>,
    seed: Option<u64>,
    env_name: Option<String>,
}

async fn generate(
    State(state): State<AppState>,
    form: Result<Form<GenerateForm>, FormRejection>,
) -> Json<Value> {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return failure(rejection.body_text()),
    };
    let requested = form
        .steps
        .unwrap_or(state.config.generation.default_steps as i64);
    let steps = step_count(requested);
    let seed = form.seed.unwrap_or(state.config.generation.default_seed);
    let env_id = state.env_or_default(form.env_name);

    let generator = state.generator.clone();
    let task_env = env_id.clone();
    let result =
        run_detached(async move { generator.generate(&task_env, steps, Some(seed)).await }).await;
    match result {
        Ok(trajectory) => {
            let id = generated_id(seed, requested);
            let length = trajectory.len();
            tracing::info!(id = %id, env_id = %env_id, length, "Generated trajectory");
            state.store.put(id.clone(), trajectory).await;
            stored(&id, length, format!("Generated {length} steps"))
        }
        Err(err) => {
            tracing::warn!(env_id = %env_id, steps, seed, error = %err, "Generation failed");
            failure(err)
        }
    }
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Json<Value> {
    match read_upload(multipart).await {
        Ok((filename, trajectory)) => {
            let id = uploaded_id(&filename);
            let length = trajectory.len();
            tracing::info!(id = %id, length, "Uploaded trajectory");
            state.store.put(id.clone(), trajectory).await;
            stored(&id, length, format!("Uploaded trajectory with {length} steps"))
        }
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "Upload rejected");
            failure(format!("{err:#}"))
        }
    }
}

/// Pull the `file` field out of a multipart body and parse it as a trajectory.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Trajectory)> {
    while let Some(field) = multipart.next_field().await.context("Malformed multipart body")? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.json").to_string();
        let bytes = field.bytes().await.context("Failed to read uploaded file")?;
        let text = std::str::from_utf8(&bytes).context("Uploaded file is not UTF-8")?;
        let trajectory = Trajectory::from_json(text)?;
        return Ok((filename, trajectory));
    }
    anyhow::bail!("No file field in upload")
}

async fn list_trajectories(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "trajectories": state.store.list().await }))
}

async fn get_trajectory(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    match state.store.get(&id).await {
        Some(trajectory) => Json(json!({ "success": true, "trajectory": trajectory })),
        None => failure(NOT_FOUND),
    }
}

async fn get_step(
    State(state): State<AppState>,
    Path((id, step)): Path<(String, i64)>,
) -> Json<Value> {
    let Some(trajectory) = state.store.get(&id).await else {
        return failure(NOT_FOUND);
    };
    let record = usize::try_from(step).ok().and_then(|i| trajectory.get(i));
    match record {
        Some(record) => Json(json!({
            "success": true,
            "step": record,
            "trajectory_length": trajectory.len(),
        })),
        None => failure(STEP_OUT_OF_RANGE),
    }
}

#[derive(Debug, Deserialize)]
struct LiveQuery {
    steps: Option<i64>,
    seed: Option<u64>,
    env_name: Option<String>,
}

async fn live_generate(
    State(state): State<AppState>,
    query: Result<Query<LiveQuery>, QueryRejection>,
) -> Json<Value> {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return failure(rejection.body_text()),
    };
    let steps = query
        .steps
        .map_or(state.config.generation.live_default_steps, step_count);
    let env_id = state.env_or_default(query.env_name);

    let generator = state.generator.clone();
    let seed = query.seed;
    match run_detached(async move { generator.generate(&env_id, steps, seed).await }).await {
        Ok(trajectory) => Json(json!({ "success": true, "trajectory": trajectory })),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
struct ContinueForm {
    from_step: usize,
    additional_steps: Option<i64>,
    seed: Option<u64>,
    env_name: Option<String>,
}

async fn continue_trajectory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: Result<Form<ContinueForm>, FormRejection>,
) -> Json<Value> {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return failure(rejection.body_text()),
    };
    let Some(existing) = state.store.get(&id).await else {
        return failure(NOT_FOUND);
    };
    let additional = form
        .additional_steps
        .map_or(state.config.generation.continue_default_steps, step_count);
    let env_id = state.env_or_default(form.env_name);

    let generator = state.generator.clone();
    let (from_step, seed) = (form.from_step, form.seed);
    let result = run_detached(async move {
        generator
            .continue_from(&env_id, &existing, from_step, additional, seed)
            .await
    })
    .await;
    match result {
        Ok(trajectory) => {
            let branch = branch_id(&id, form.from_step);
            let length = trajectory.len();
            let added = length - (form.from_step + 1);
            tracing::info!(id = %branch, source = %id, length, "Continued trajectory");
            state.store.put(branch.clone(), trajectory).await;
            stored(
                &branch,
                length,
                format!("Continued from step {} with {added} new steps", form.from_step),
            )
        }
        Err(err) => {
            tracing::warn!(
                source = %id,
                from_step = form.from_step,
                error = %err,
                "Continuation failed"
            );
            failure(err)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::env::EnvRegistry;
    use crate::trajectory::types::tests::record;

    fn app() -> (Router, TrajectoryStore) {
        app_with_config(HackviewConfig::default())
    }

    fn app_with_config(config: HackviewConfig) -> (Router, TrajectoryStore) {
        let store = TrajectoryStore::new();
        let generator = TrajectoryGenerator::new(EnvRegistry::mock(200));
        let state = AppState::new(store.clone(), generator, config);
        (build_router(state), store)
    }

    async fn page(app: &Router) -> String {
        let response = app.clone().oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn call(app: &Router, request: Request<Body>) -> Value {
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn form_req(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_req(filename: &str, content: &str) -> Request<Body> {
        let boundary = "hackviewboundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/json\r\n\r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        );
        Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn generate_then_fetch() {
        let (app, _) = app();

        let created = call(&app, form_req("/generate", "steps=10&seed=7")).await;
        assert_eq!(created["success"], true);
        assert_eq!(created["trajectory_id"], "traj_7_10");
        let length = created["length"].as_u64().unwrap() as usize;
        assert_eq!(created["message"], format!("Generated {length} steps"));

        let fetched = call(&app, get_req("/trajectory/traj_7_10")).await;
        assert_eq!(fetched["success"], true);
        let steps = fetched["trajectory"].as_array().unwrap();
        assert_eq!(steps.len(), length);
        assert!(length <= 10);

        let ended = |s: &Value| s["terminated"] == true || s["truncated"] == true;
        for step in &steps[..length - 1] {
            assert!(!ended(step));
        }
        if length < 10 {
            assert!(ended(&steps[length - 1]));
        }
    }

    #[tokio::test]
    async fn generate_reports_failure_in_body() {
        let (app, store) = app();
        let resp = call(&app, form_req("/generate", "steps=5&seed=1&env_name=Pong-v5")).await;
        assert_eq!(resp["success"], false);
        assert!(resp["error"].as_str().unwrap().contains("Pong-v5"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn step_lookup_bounds() {
        let (app, store) = app();
        store
            .put("t", Trajectory::from(vec![record(0, "a", 1), record(1, "b", 2)]))
            .await;

        let ok = call(&app, get_req("/trajectory/t/step/1")).await;
        assert_eq!(ok["success"], true);
        assert_eq!(ok["step"]["action"], 2);
        assert_eq!(ok["trajectory_length"], 2);

        for n in ["2", "-1"] {
            let out = call(&app, get_req(&format!("/trajectory/t/step/{n}"))).await;
            assert_eq!(out["success"], false);
            assert_eq!(out["error"], STEP_OUT_OF_RANGE);
        }

        let missing = call(&app, get_req("/trajectory/nope/step/0")).await;
        assert_eq!(missing["error"], NOT_FOUND);
        let missing = call(&app, get_req("/trajectory/nope")).await;
        assert_eq!(missing["success"], false);
        assert_eq!(missing["error"], NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_and_list() {
        let (app, _) = app();
        let content =
            serde_json::to_string(&Trajectory::from(vec![record(0, "Welcome to the dungeon", 3)]))
                .unwrap();

        let resp = call(&app, upload_req("my_run.json", &content)).await;
        assert_eq!(resp["success"], true);
        assert_eq!(resp["trajectory_id"], "uploaded_my_run");
        assert_eq!(resp["message"], "Uploaded trajectory with 1 steps");

        let list = call(&app, get_req("/trajectories")).await;
        let rows = list["trajectories"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "uploaded_my_run");
        assert_eq!(rows[0]["length"], 1);
        assert_eq!(rows[0]["first_message"], "Welcome to the dungeon");
    }

    #[tokio::test]
    async fn malformed_upload_is_reported() {
        let (app, store) = app();
        let resp = call(&app, upload_req("bad.json", "{not json")).await;
        assert_eq!(resp["success"], false);
        assert!(store.is_empty().await);

        let resp = call(&app, upload_req("partial.json", r#"[{"step": 0}]"#)).await;
        assert_eq!(resp["success"], false);
    }

    #[tokio::test]
    async fn live_generate_does_not_store() {
        let (app, store) = app();
        let resp = call(&app, get_req("/live-generate?steps=4&seed=3")).await;
        assert_eq!(resp["success"], true);
        let steps = resp["trajectory"].as_array().unwrap();
        assert!(!steps.is_empty() && steps.len() <= 4);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn continue_stores_branch() {
        let (app, store) = app();
        call(&app, form_req("/generate", "steps=8&seed=5")).await;
        let source = store.get("traj_5_8").await.unwrap();
        let k = source.len() / 2;

        let resp = call(
            &app,
            form_req(
                "/trajectory/traj_5_8/continue",
                &format!("from_step={k}&additional_steps=3&seed=5"),
            ),
        )
        .await;
        assert_eq!(resp["success"], true, "{resp}");
        let id = format!("branch_traj_5_8_{k}");
        assert_eq!(resp["trajectory_id"], id.as_str());

        let branch = store.get(&id).await.unwrap();
        assert_eq!(&branch.steps()[..=k], &source.steps()[..=k]);
        assert!(branch.steps()[k + 1..]
            .iter()
            .all(|s| s.branch_from_step == Some(k)));

        let out_of_range = call(
            &app,
            form_req("/trajectory/traj_5_8/continue", &format!("from_step={}", source.len())),
        )
        .await;
        assert_eq!(out_of_range["success"], false);

        let missing = call(&app, form_req("/trajectory/nope/continue", "from_step=0")).await;
        assert_eq!(missing["error"], NOT_FOUND);
    }

    #[tokio::test]
    async fn index_serves_viewer() {
        let (app, _) = app();
        assert!(page(&app).await.contains("NetHack"));
    }

    #[tokio::test]
    async fn index_prefers_assets_dir() {
        let dir = std::env::temp_dir().join(format!("hackview_assets_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<p>custom viewer</p>").unwrap();

        let mut config = HackviewConfig::default();
        config.server.assets_dir = Some(dir.display().to_string());
        let (app, _) = app_with_config(config);
        assert_eq!(page(&app).await, "<p>custom viewer</p>");

        // A directory without the page falls back to the built-in viewer.
        std::fs::remove_dir_all(&dir).ok();
        assert!(page(&app).await.contains("NetHack"));
    }

    #[tokio::test]
    async fn negative_step_counts_generate_nothing() {
        let (app, store) = app();
        let resp = call(&app, form_req("/generate", "steps=-1&seed=42")).await;
        assert_eq!(resp["success"], true);
        assert_eq!(resp["trajectory_id"], "traj_42_-1");
        assert_eq!(resp["length"], 0);
        assert_eq!(store.get("traj_42_-1").await.map(|t| t.len()), Some(0));

        let live = call(&app, get_req("/live-generate?steps=-3&seed=1")).await;
        assert_eq!(live["success"], true);
        assert_eq!(live["trajectory"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn malformed_form_is_reported_as_json() {
        let (app, store) = app();
        let resp = call(&app, form_req("/generate", "steps=many")).await;
        assert_eq!(resp["success"], false);
        assert!(!resp["error"].as_str().unwrap().is_empty());

        let resp = call(&app, get_req("/live-generate?seed=abc")).await;
        assert_eq!(resp["success"], false);
        assert!(store.is_empty().await);
    }
}
