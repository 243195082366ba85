use crate::context::build_workbook_context;
use crate::errors::ApiError;
use crate::intent::{extract_update_action, is_modification_request};
use crate::model::{
    CellUpdateRequest, CellUpdateResponse, ChatRequest, ExportRequest, RecalculateResponse,
    SessionId, SessionResponse, SheetDataQuery, SheetDataResponse, StatsResponse, UploadResponse,
};
use crate::prompts::{chat_prompt, edit_prompt, initial_analysis_prompt};
use crate::session::Session;
use crate::state::AppState;
use crate::vba::extract_vba_modules;
use crate::workbook::{
    apply_edit_to_snapshot, build_snapshot, check_cell_bounds, write_cell_to_file,
};
use anyhow::{Context, Result, anyhow};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{info, warn};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Headroom over the upload cap for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Rows returned by a sheet-data request when no end bound is given.
const DEFAULT_PAGE_ROWS: u32 = 100;

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config().max_upload_bytes as usize + MULTIPART_OVERHEAD;
    Router::new()
        .route("/", get(root))
        .route("/api/upload", post(upload))
        .route("/api/chat", post(chat))
        .route("/api/update-cell", post(update_cell))
        .route("/api/sheet-data/{session_id}/{sheet_name}", get(sheet_data))
        .route("/api/recalculate/{session_id}", post(recalculate))
        .route("/api/export", post(export))
        .route("/api/session/{session_id}", get(session_info))
        .route("/api/stats", get(stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind, serve until ctrl-c, then drain the session store so no temp files
/// outlive the process on a clean shutdown.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = state.config().http_bind_address;
    let store = state.store_arc();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    store.drain();
    Ok(())
}

async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Excel agent API is running",
        "model": state.model().model_name(),
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let config = state.config();
    Json(StatsResponse {
        active_sessions: state.store().len(),
        session_timeout_secs: config.session_timeout.as_secs(),
        model: state.model().model_name(),
        max_upload_bytes: config.max_upload_bytes,
        allowed_extensions: config.allowed_extensions.clone(),
    })
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let (filename, contents) = read_upload_field(&mut multipart).await?;

    let config = state.config();
    validate_upload(config, &filename, contents.len() as u64)?;

    // Nothing is persisted until validation has passed.
    let temp_dir = task::spawn_blocking({
        let root = config.temp_root.clone();
        move || -> Result<PathBuf> {
            let dir = tempfile::Builder::new()
                .prefix("session-")
                .tempdir_in(&root)
                .context("failed to create session directory")?;
            Ok(dir.keep())
        }
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!(e)))??;

    let file_path = temp_dir.join(&filename);
    if let Err(err) = tokio::fs::write(&file_path, &contents).await {
        cleanup_dir(&temp_dir);
        return Err(ApiError::Internal(
            anyhow::Error::new(err).context("failed to persist upload"),
        ));
    }

    let is_macro_enabled = filename.to_lowercase().ends_with(".xlsm");
    let analysis = task::spawn_blocking({
        let path = file_path.clone();
        move || -> Result<_> {
            let snapshot = build_snapshot(&path)?;
            let vba_modules = if is_macro_enabled {
                extract_vba_modules(&path).unwrap_or_else(|err| {
                    warn!(error = %err, "VBA extraction failed, continuing without macros");
                    BTreeMap::new()
                })
            } else {
                BTreeMap::new()
            };
            Ok((snapshot, vba_modules))
        }
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!(e)));

    let (snapshot, vba_modules) = match analysis {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(err)) => {
            cleanup_dir(&temp_dir);
            return Err(ApiError::Internal(err));
        }
        Err(err) => {
            cleanup_dir(&temp_dir);
            return Err(err);
        }
    };

    // Model hiccups degrade to a canned summary instead of failing upload.
    let workbook_context = build_workbook_context(&filename, &snapshot, &vba_modules);
    let initial_analysis = match state
        .model()
        .generate(&initial_analysis_prompt(&filename, &workbook_context))
        .await
    {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "initial analysis failed, using fallback summary");
            format!(
                "📊 Fichier \"{}\" chargé : {} feuille(s). L'analyse automatique est indisponible \
                 pour le moment, mais vous pouvez poser vos questions.",
                filename, snapshot.total_sheets
            )
        }
    };

    let structure = snapshot.clone();
    let module_names: Vec<String> = vba_modules.keys().cloned().collect();
    let module_sources = vba_modules.clone();

    let session = Session::new(filename.clone(), temp_dir, file_path, snapshot, vba_modules);
    let session_id = state.store().insert(session);
    info!(session = %session_id, filename = %filename, "workbook uploaded");

    Ok(Json(UploadResponse {
        session_id,
        filename,
        structure,
        vba_modules: module_names,
        vba_sources: module_sources,
        initial_analysis,
    }))
}

/// Runs before anything touches the filesystem, so a rejected upload leaves
/// no session and no temp file behind.
fn validate_upload(
    config: &crate::config::ServerConfig,
    filename: &str,
    size: u64,
) -> Result<(), ApiError> {
    if !config.is_extension_allowed(filename) {
        return Err(ApiError::Validation(
            "Invalid file type. Only .xlsx and .xlsm files are allowed.".to_string(),
        ));
    }
    if size > config.max_upload_bytes {
        return Err(ApiError::Validation(format!(
            "File too large. Maximum size is {}MB",
            config.max_upload_bytes / 1024 / 1024
        )));
    }
    Ok(())
}

async fn read_upload_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>), ApiError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?;
        let Some(field) = field else {
            return Err(ApiError::Validation("missing file field".to_string()));
        };
        let Some(filename) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        let contents = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;
        return Ok((filename, contents.to_vec()));
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let reply = compute_chat_reply(&state, &request.session_id, &request.message).await?;

    state
        .store()
        .with_session_mut(&request.session_id, |session| {
            session.history.push(crate::model::ChatTurn {
                user: request.message.clone(),
                assistant: reply.clone(),
                timestamp: chrono::Utc::now(),
            });
        });

    Ok(stream_reply(reply, state.config().stream_pace))
}

/// Full chat turn minus the streaming: route the message through the intent
/// gate, call the model, apply a decoded edit, and return the text to show.
async fn compute_chat_reply(
    state: &AppState,
    session_id: &SessionId,
    message: &str,
) -> Result<String, ApiError> {
    let (workbook_context, first_sheet, history, file_path) = state
        .store()
        .with_session(session_id, |session| {
            (
                build_workbook_context(&session.filename, &session.snapshot, &session.vba_modules),
                session
                    .snapshot
                    .first_sheet_name()
                    .unwrap_or("Feuil1")
                    .to_string(),
                session.history.clone(),
                session.file_path.clone(),
            )
        })
        .ok_or(ApiError::SessionNotFound)?;

    if !is_modification_request(message) {
        let prompt = chat_prompt(message, &workbook_context, &history);
        return Ok(state.model().generate(&prompt).await?);
    }

    let prompt = edit_prompt(message, &first_sheet);
    let reply = state.model().generate(&prompt).await?;

    // A reply we cannot decode is shown as-is, never applied.
    let Some(action) = extract_update_action(&reply) else {
        return Ok(reply);
    };

    let sheet_name = action.sheet.clone().unwrap_or(first_sheet);
    let write = task::spawn_blocking({
        let (path, sheet, value) = (file_path, sheet_name.clone(), action.value.clone());
        let (row, col) = (action.row, action.col);
        move || write_cell_to_file(&path, &sheet, row, col, &value)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!(e)))?;

    if let Err(err) = write {
        warn!(error = %err, cell = %action.cell, "model-requested edit failed");
        return Ok(format!(
            "❌ Erreur : impossible de modifier la cellule {} ({err})",
            action.cell
        ));
    }

    state
        .store()
        .with_session_mut(session_id, |session| {
            apply_edit_to_snapshot(
                &mut session.snapshot,
                &sheet_name,
                action.row,
                action.col,
                &action.value,
            )
        })
        .ok_or(ApiError::SessionNotFound)?
        .map_err(ApiError::Internal)?;

    info!(cell = %action.cell, sheet = %sheet_name, "cell updated from chat");
    Ok(action.message.unwrap_or_else(|| {
        format!(
            "✅ J'ai modifié la cellule {} avec la valeur '{}'. La modification est sauvegardée.",
            action.cell, action.value
        )
    }))
}

/// Word-by-word `{chunk}` events with a fixed pacing delay, closed by a
/// `{done: true}` marker.
fn stream_reply(
    text: String,
    pace: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let words: Vec<String> = text.split(' ').map(|word| format!("{word} ")).collect();
    let chunks = stream::iter(words).then(move |word| async move {
        tokio::time::sleep(pace).await;
        Ok(Event::default().data(json!({ "chunk": word }).to_string()))
    });
    let done =
        stream::once(async { Ok(Event::default().data(json!({ "done": true }).to_string())) });
    Sse::new(chunks.chain(done))
}

async fn update_cell(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CellUpdateRequest>,
) -> Result<Json<CellUpdateResponse>, ApiError> {
    check_cell_bounds(request.row, request.col)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let file_path = state
        .store()
        .with_session(&request.session_id, |session| {
            session
                .snapshot
                .sheet(&request.sheet_name)
                .map(|_| session.file_path.clone())
        })
        .ok_or(ApiError::SessionNotFound)?
        .ok_or_else(|| ApiError::SheetNotFound(request.sheet_name.clone()))?;

    // File first; the snapshot only moves once the write is durable.
    task::spawn_blocking({
        let (sheet, value) = (request.sheet_name.clone(), request.value.clone());
        let (row, col) = (request.row, request.col);
        move || write_cell_to_file(&file_path, &sheet, row, col, &value)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!(e)))?
    .map_err(ApiError::Internal)?;

    state
        .store()
        .with_session_mut(&request.session_id, |session| {
            apply_edit_to_snapshot(
                &mut session.snapshot,
                &request.sheet_name,
                request.row,
                request.col,
                &request.value,
            )
        })
        .ok_or(ApiError::SessionNotFound)?
        .map_err(ApiError::Internal)?;

    Ok(Json(CellUpdateResponse {
        status: "success".to_string(),
        message: "Cell updated".to_string(),
    }))
}

async fn sheet_data(
    State(state): State<Arc<AppState>>,
    Path((session_id, sheet_name)): Path<(SessionId, String)>,
    Query(query): Query<SheetDataQuery>,
) -> Result<Json<SheetDataResponse>, ApiError> {
    state
        .store()
        .with_session(&session_id, |session| {
            let sheet = session
                .snapshot
                .sheet(&sheet_name)
                .ok_or_else(|| ApiError::SheetNotFound(sheet_name.clone()))?;

            let total_rows = sheet.data.len() as u32;
            let total_cols = sheet.data.iter().map(Vec::len).max().unwrap_or(0) as u32;

            let start_row = query.start_row.unwrap_or(0).min(total_rows);
            let end_row = query
                .end_row
                .unwrap_or(start_row + DEFAULT_PAGE_ROWS)
                .clamp(start_row, total_rows);
            let start_col = query.start_col.unwrap_or(0).min(total_cols);
            let end_col = query
                .end_col
                .unwrap_or(total_cols)
                .clamp(start_col, total_cols);

            let data = sheet.data[start_row as usize..end_row as usize]
                .iter()
                .map(|row| {
                    row.iter()
                        .skip(start_col as usize)
                        .take((end_col - start_col) as usize)
                        .cloned()
                        .collect()
                })
                .collect();

            Ok(Json(SheetDataResponse {
                sheet_name: sheet.name.clone(),
                start_row,
                end_row,
                start_col,
                end_col,
                total_rows: sheet.max_row,
                total_cols: sheet.max_column,
                data,
                formulas: sheet.formulas.clone(),
                formatting: sheet.formatting.clone(),
                column_widths: sheet.column_widths.clone(),
                row_heights: sheet.row_heights.clone(),
                merged_ranges: sheet.merged_ranges.clone(),
            }))
        })
        .ok_or(ApiError::SessionNotFound)?
}

async fn recalculate(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<RecalculateResponse>, ApiError> {
    let file_path = state
        .store()
        .with_session(&session_id, |session| session.file_path.clone())
        .ok_or(ApiError::SessionNotFound)?;

    let snapshot = task::spawn_blocking(move || build_snapshot(&file_path))
        .await
        .map_err(|e| ApiError::Internal(anyhow!(e)))?
        .map_err(ApiError::Internal)?;

    let sheets_refreshed = snapshot.total_sheets;
    state
        .store()
        .with_session_mut(&session_id, |session| {
            session.snapshot = snapshot;
        })
        .ok_or(ApiError::SessionNotFound)?;

    Ok(Json(RecalculateResponse {
        status: "success".to_string(),
        sheets_refreshed,
    }))
}

async fn export(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let (file_path, filename) = state
        .store()
        .with_session(&request.session_id, |session| {
            (session.file_path.clone(), session.filename.clone())
        })
        .ok_or(ApiError::SessionNotFound)?;

    let bytes = tokio::fs::read(&file_path)
        .await
        .map_err(|_| ApiError::Validation("File not found".to_string()))?;

    let disposition = format!("attachment; filename=modified_{filename}");
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionResponse>, ApiError> {
    state
        .store()
        .with_session(&session_id, |session| {
            Json(SessionResponse {
                session_id: session_id.clone(),
                filename: session.filename.clone(),
                structure: session.snapshot.clone(),
                vba_modules: session.vba_modules.keys().cloned().collect(),
                chat_history: session.history.clone(),
                created: session.created_at,
            })
        })
        .ok_or(ApiError::SessionNotFound)
}

fn cleanup_dir(dir: &std::path::Path) {
    if let Err(err) = std::fs::remove_dir_all(dir) {
        warn!(path = %dir.display(), error = %err, "failed to clean up session directory");
    }
}
