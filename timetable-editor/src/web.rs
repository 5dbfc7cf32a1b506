use actix_files::Files;
use actix_session::storage::CookieSessionStore;
use actix_session::{Session as CookieSession, SessionMiddleware};
use actix_web::cookie::Key;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{middleware, web, App, HttpResponse, HttpServer, Result};
use chrono::{DateTime, Duration, Utc, Weekday};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::TimetableError;
use crate::form::{
    export_workbook, template_csv, validate_time_structure, CellEditRequest, GridReplaceRequest,
    TimeStructureRequest,
};
use crate::parser::{load_subjects, UploadOptions};
use crate::schedule::slot_utils::format_clock;
use crate::schedule::workload::OrphanedReference;
use crate::schedule::{SlotKind, TeacherLoadRecord, TimeSlot};
use crate::session::{day_name, orphan_warnings, parse_school_day, Session, SessionWarning};

const SESSION_KEY: &str = "timetable_session";

struct StoredSession {
    session: Session,
    last_seen: DateTime<Utc>,
}

/// One editing session per browser, keyed by the id stored in its cookie.
/// Sessions untouched for longer than `idle` are dropped.
pub struct SessionStore {
    sessions: HashMap<String, StoredSession>,
    idle: Duration,
}

impl SessionStore {
    pub fn new(idle: Duration) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            idle,
        }
    }

    /// Drops every session idle since before `now - idle`
    fn sweep(&mut self, now: DateTime<Utc>) {
        let before = self.sessions.len();
        let idle = self.idle;
        self.sessions.retain(|_, stored| now - stored.last_seen < idle);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "evicted idle sessions");
        }
    }

    fn get_or_create(&mut self, id: String, now: DateTime<Utc>) -> &mut Session {
        let stored = self.sessions.entry(id).or_insert_with(|| StoredSession {
            session: Session::new(),
            last_seen: now,
        });
        stored.last_seen = now;
        &mut stored.session
    }

    fn get(&mut self, id: &str, now: DateTime<Utc>) -> Option<&mut Session> {
        let stored = self.sessions.get_mut(id)?;
        stored.last_seen = now;
        Some(&mut stored.session)
    }
}

pub struct AppState {
    pub sessions: Mutex<SessionStore>,
    pub upload: UploadOptions,
}

impl AppState {
    pub fn new(upload: UploadOptions, session_idle: Duration) -> Self {
        AppState {
            sessions: Mutex::new(SessionStore::new(session_idle)),
            upload,
        }
    }

    fn sessions(&self) -> Result<MutexGuard<'_, SessionStore>> {
        self.sessions
            .lock()
            .map_err(|_| actix_web::error::ErrorInternalServerError("session store is poisoned"))
    }
}

#[derive(Deserialize)]
pub struct TemplateQuery {
    /// Comma-separated class tiers to pre-fill
    tiers: Option<String>,
}

#[derive(Serialize)]
pub struct SlotView {
    label: String,
    kind: SlotKind,
    start: String,
    end: String,
    time: String,
}

impl From<&TimeSlot> for SlotView {
    fn from(slot: &TimeSlot) -> Self {
        SlotView {
            label: slot.label.clone(),
            kind: slot.kind,
            start: format_clock(slot.start),
            end: format_clock(slot.end),
            time: slot.time_range(),
        }
    }
}

#[derive(Serialize)]
pub struct GridRowView {
    label: String,
    kind: SlotKind,
    time: String,
    cells: Vec<Option<String>>,
    conflicts: Vec<bool>,
}

#[derive(Serialize)]
pub struct GridResponse {
    day: String,
    classes: Vec<String>,
    rows: Vec<GridRowView>,
    conflict_count: usize,
    options: BTreeMap<String, Vec<Option<String>>>,
    warnings: Vec<SessionWarning>,
}

#[derive(Serialize)]
pub struct WorkloadResponse {
    records: Vec<TeacherLoadRecord>,
    orphaned: Vec<OrphanedReference>,
    warnings: Vec<SessionWarning>,
}

fn new_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn session_id(cookie: &CookieSession) -> Result<String> {
    if let Some(id) = cookie.get::<String>(SESSION_KEY)? {
        return Ok(id);
    }
    let id = new_session_id();
    cookie.insert(SESSION_KEY, &id)?;
    info!("started new editing session");
    Ok(id)
}

/// Runs `f` against the caller's editing session, starting one if needed
fn with_session<T>(
    state: &AppState,
    cookie: &CookieSession,
    f: impl FnOnce(&mut Session) -> T,
) -> Result<T> {
    let id = session_id(cookie)?;
    let now = Utc::now();
    let mut sessions = state.sessions()?;
    sessions.sweep(now);
    Ok(f(sessions.get_or_create(id, now)))
}

/// Like [`with_session`] but never starts a session: callers without one
/// see an empty session that is discarded afterwards
fn read_session<T>(
    state: &AppState,
    cookie: &CookieSession,
    f: impl FnOnce(&mut Session) -> T,
) -> Result<T> {
    let id = cookie.get::<String>(SESSION_KEY)?;
    let now = Utc::now();
    let mut sessions = state.sessions()?;
    sessions.sweep(now);
    let existing = match id {
        Some(id) => sessions.get(&id, now),
        None => None,
    };
    Ok(match existing {
        Some(session) => f(session),
        None => f(&mut Session::new()),
    })
}

fn failure(err: TimetableError) -> HttpResponse {
    let body = serde_json::json!({"success": false, "error": err.to_string()});
    if err.is_client_error() {
        HttpResponse::BadRequest().json(body)
    } else {
        warn!(error = %err, "request failed");
        HttpResponse::InternalServerError().json(body)
    }
}

fn respond<T: Serialize>(result: crate::error::Result<T>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => failure(e),
    }
}

fn attachment(content_type: &str, filename: &str, bytes: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename.to_string())],
        })
        .body(bytes)
}

fn grid_view(session: &mut Session, day: Weekday) -> crate::error::Result<GridResponse> {
    let conflicts = session.conflicts(day)?;
    let grid = session.grid(day)?;
    let classes = grid.classes().to_vec();
    let rows: Vec<GridRowView> = grid
        .rows()
        .iter()
        .map(|row| GridRowView {
            label: row.label.clone(),
            kind: row.kind,
            time: row.time.clone(),
            cells: row.cells.clone(),
            conflicts: classes
                .iter()
                .map(|class| conflicts.contains(&(row.label.clone(), class.clone())))
                .collect(),
        })
        .collect();

    let mut options = BTreeMap::new();
    for class in &classes {
        options.insert(class.clone(), session.cell_options(class)?);
    }

    Ok(GridResponse {
        day: day_name(day).to_string(),
        classes,
        rows,
        conflict_count: conflicts.len(),
        options,
        warnings: session.take_warnings(),
    })
}

// Master data upload endpoint
async fn upload(
    body: web::Bytes,
    state: web::Data<AppState>,
    cookie: CookieSession,
) -> Result<HttpResponse> {
    let data = match load_subjects(&body[..], state.upload) {
        Ok(data) => data,
        Err(e) => return Ok(failure(e)),
    };
    let rows = data.subjects.len();

    let classes = with_session(&state, &cookie, |session| {
        session.load_master_data(data);
        session.classes().to_vec()
    })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Loaded {} subject rows", rows),
        "classes": classes,
    })))
}

async fn template(query: web::Query<TemplateQuery>) -> Result<HttpResponse> {
    let tiers: Vec<String> = query
        .tiers
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    Ok(match template_csv(&tiers) {
        Ok(bytes) => attachment("text/csv", "timetable_template.csv", bytes),
        Err(e) => failure(e),
    })
}

async fn get_time_structure(
    state: web::Data<AppState>,
    cookie: CookieSession,
) -> Result<HttpResponse> {
    let slots: Vec<SlotView> = read_session(&state, &cookie, |session| {
        session.time_structure().iter().map(SlotView::from).collect()
    })?;
    Ok(HttpResponse::Ok().json(slots))
}

async fn save_time_structure(
    req: web::Json<TimeStructureRequest>,
    state: web::Data<AppState>,
    cookie: CookieSession,
) -> Result<HttpResponse> {
    let config = match validate_time_structure(&req) {
        Ok(config) => config,
        Err(e) => return Ok(failure(e)),
    };
    let result = with_session(&state, &cookie, |session| {
        session
            .apply_time_structure(&config)
            .map(|slots| slots.iter().map(SlotView::from).collect::<Vec<_>>())
    })?;
    Ok(respond(result))
}

async fn get_grid(
    day: web::Path<String>,
    state: web::Data<AppState>,
    cookie: CookieSession,
) -> Result<HttpResponse> {
    let day = match parse_school_day(&day) {
        Ok(day) => day,
        Err(e) => return Ok(failure(e)),
    };
    Ok(respond(read_session(&state, &cookie, |session| {
        grid_view(session, day)
    })?))
}

async fn update_cell(
    day: web::Path<String>,
    req: web::Json<CellEditRequest>,
    state: web::Data<AppState>,
    cookie: CookieSession,
) -> Result<HttpResponse> {
    let day = match parse_school_day(&day) {
        Ok(day) => day,
        Err(e) => return Ok(failure(e)),
    };
    let edit = req.into_inner();
    Ok(respond(with_session(&state, &cookie, |session| {
        session.set_cell(day, &edit.period, &edit.class, edit.value)?;
        grid_view(session, day)
    })?))
}

async fn replace_grid(
    day: web::Path<String>,
    req: web::Json<GridReplaceRequest>,
    state: web::Data<AppState>,
    cookie: CookieSession,
) -> Result<HttpResponse> {
    let day = match parse_school_day(&day) {
        Ok(day) => day,
        Err(e) => return Ok(failure(e)),
    };
    let cells = req.into_inner().cells;
    Ok(respond(with_session(&state, &cookie, |session| {
        session.replace_grid(day, cells)?;
        grid_view(session, day)
    })?))
}

async fn get_workload(state: web::Data<AppState>, cookie: CookieSession) -> Result<HttpResponse> {
    Ok(respond(read_session(&state, &cookie, |session| {
        let report = session.workload()?;
        let mut warnings = session.take_warnings();
        warnings.extend(orphan_warnings(&report));
        Ok(WorkloadResponse {
            records: report.records,
            orphaned: report.orphaned,
            warnings,
        })
    })?))
}

async fn export(state: web::Data<AppState>, cookie: CookieSession) -> Result<HttpResponse> {
    let result = read_session(&state, &cookie, |session| {
        let grids = session.all_grids()?;
        let report = session.workload()?;
        export_workbook(&grids, &report)
    })?;
    Ok(match result {
        Ok(bytes) => attachment("application/zip", "timetable.zip", bytes),
        Err(e) => failure(e),
    })
}

// HTML page handler
async fn index() -> Result<HttpResponse> {
    let html = include_str!("../templates/index.html");
    Ok(HttpResponse::Ok().content_type("text/html").body(html))
}

/// Registers every page and API route
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(1 << 20))
        .route("/", web::get().to(index))
        .route("/api/upload", web::post().to(upload))
        .route("/api/template", web::get().to(template))
        .service(
            web::resource("/api/time-structure")
                .route(web::get().to(get_time_structure))
                .route(web::post().to(save_time_structure)),
        )
        .service(
            web::resource("/api/grid/{day}")
                .route(web::get().to(get_grid))
                .route(web::put().to(replace_grid)),
        )
        .service(web::resource("/api/grid/{day}/cell").route(web::put().to(update_cell)))
        .route("/api/workload", web::get().to(get_workload))
        .route("/api/export", web::get().to(export));
}

pub async fn start_server(config: ServerConfig) -> std::io::Result<()> {
    let app_state = web::Data::new(AppState::new(config.upload, config.session_idle));
    let secret_key = Key::generate();
    let static_dir = config.static_dir.clone();
    let secure_cookies = config.secure_cookies;

    info!(
        host = %config.host,
        port = config.port,
        derive_initials = config.upload.derive_initials,
        "starting timetable editor"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_secure(secure_cookies)
                    .build(),
            )
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", static_dir.clone()))
            .configure(routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::cookie::Cookie;
    use actix_web::test;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    const MASTER_CSV: &str = "\
Class,Subject Name,Subject Code,Teacher Name,Teacher Initials,Periods/Week
7A,Matematika,MAT,Budi Santoso,BDS,4
7B,IPA,IPA,Budi Santoso,BDS,2
7B,Bahasa Inggris,ENG,Sri Wahyuni,SRI,3
";

    fn state(idle: Duration) -> web::Data<AppState> {
        web::Data::new(AppState::new(UploadOptions::default(), idle))
    }

    macro_rules! app {
        () => {
            app!(state(Duration::hours(12)))
        };
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state)
                    .wrap(SessionMiddleware::new(
                        CookieSessionStore::default(),
                        Key::generate(),
                    ))
                    .configure(routes),
            )
            .await
        };
    }

    fn time_settings() -> Value {
        json!({
            "start_time": "07:00",
            "period_minutes": 35,
            "total_periods": 4,
            "breaks": [{"after_period": 2, "duration_minutes": 15}]
        })
    }

    #[actix_web::test]
    async fn full_editing_flow_flags_double_booking() {
        let app = app!();

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/upload")
                .set_payload(MASTER_CSV)
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        let cookie: Cookie<'static> = resp
            .response()
            .cookies()
            .next()
            .expect("session cookie")
            .into_owned();

        let slots: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/time-structure")
                .cookie(cookie.clone())
                .set_json(time_settings())
                .to_request(),
        )
        .await;
        let labels: Vec<&str> = slots
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["label"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["1", "2", "BREAK 1", "3", "4"]);
        assert_eq!(slots[2]["time"], "08:10 - 08:25");

        let grid: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/grid/monday")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(grid["rows"][2]["cells"], json!(["RECESS", "RECESS"]));
        assert_eq!(grid["options"]["7A"][0], Value::Null);

        for (class, value) in [("7A", "MAT (BDS)"), ("7B", "IPA (BDS)")] {
            let resp = test::call_service(
                &app,
                test::TestRequest::put()
                    .uri("/api/grid/monday/cell")
                    .cookie(cookie.clone())
                    .set_json(json!({"period": "1", "class": class, "value": value}))
                    .to_request(),
            )
            .await;
            assert!(resp.status().is_success());
        }

        let grid: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/grid/monday")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(grid["conflict_count"], 2);
        assert_eq!(grid["rows"][0]["conflicts"], json!([true, true]));
        assert_eq!(grid["rows"][1]["conflicts"], json!([false, false]));

        let workload: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get()
                .uri("/api/workload")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(workload["records"][0]["teacher_initials"], "BDS");
        assert_eq!(workload["records"][0]["placed_periods"], 2);
        assert_eq!(
            workload["records"][0]["status"],
            json!({"kind": "UNDER", "periods": 4})
        );
        assert_eq!(workload["records"][1]["status"], json!({"kind": "UNDER", "periods": 3}));

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/export")
                .cookie(cookie)
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/zip"
        );
    }

    #[::core::prelude::v1::test]
    fn sweep_drops_only_idle_sessions() {
        let t0 = Utc::now();
        let mut store = SessionStore::new(Duration::minutes(90));
        store.get_or_create("old".to_string(), t0);
        store.get_or_create("recent".to_string(), t0 + Duration::hours(2));

        store.sweep(t0 + Duration::hours(3));
        assert!(store.get("old", t0 + Duration::hours(3)).is_none());
        assert!(store.get("recent", t0 + Duration::hours(3)).is_some());
        assert_eq!(store.sessions.len(), 1);
    }

    #[::core::prelude::v1::test]
    fn reading_a_session_keeps_it_alive() {
        let t0 = Utc::now();
        let mut store = SessionStore::new(Duration::minutes(90));
        store.get_or_create("teacher".to_string(), t0);
        assert!(store.get("teacher", t0 + Duration::minutes(80)).is_some());

        store.sweep(t0 + Duration::minutes(160));
        assert_eq!(store.sessions.len(), 1);
    }

    #[actix_web::test]
    async fn read_only_requests_do_not_start_sessions() {
        let state = state(Duration::hours(12));
        let app = app!(state.clone());

        for uri in ["/api/time-structure", "/api/grid/monday", "/api/workload"] {
            for _ in 0..20 {
                let resp =
                    test::call_service(&app, test::TestRequest::get().uri(uri).to_request())
                        .await;
                assert!(resp.response().cookies().next().is_none(), "{uri}");
            }
        }
        assert_eq!(state.sessions.lock().unwrap().sessions.len(), 0);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/upload")
                .set_payload(MASTER_CSV)
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        assert_eq!(state.sessions.lock().unwrap().sessions.len(), 1);
    }

    #[actix_web::test]
    async fn idle_session_is_forgotten() {
        let app = app!(state(Duration::zero()));
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/upload")
                .set_payload(MASTER_CSV)
                .to_request(),
        )
        .await;
        let cookie = resp.response().cookies().next().unwrap().into_owned();

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/grid/monday")
                .cookie(cookie)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "no school data has been uploaded");
    }

    #[actix_web::test]
    async fn grid_needs_setup_first() {
        let app = app!();
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/grid/monday").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "no school data has been uploaded");
    }

    #[actix_web::test]
    async fn rejects_malformed_upload_and_bad_day() {
        let app = app!();
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/upload")
                .set_payload("Class,Teacher Name\n7A,Budi\n")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Malformed upload: missing required columns"));

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/grid/sunday").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn rejects_invalid_time_settings() {
        let app = app!();
        let mut settings = time_settings();
        settings["breaks"][0]["duration_minutes"] = json!(90);
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/time-structure")
                .set_json(settings)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn template_download_lists_tiers() {
        let app = app!();
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/template?tiers=Kelas%207,Kelas%208")
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("Kelas 8,Matematika"));
    }
}
