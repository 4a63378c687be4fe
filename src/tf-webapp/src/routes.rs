use std::convert::Infallible;
use std::path::Path;
use std::sync::{Arc, Mutex};

use hyper::body::{Bytes, HttpBody};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{error, info, warn};
use tf_serve::{preprocess, Classification, ImageClassifier};
use uuid::Uuid;

use crate::page;
use crate::session::{self, SessionState, SessionStore, UploadedImage};

pub const FILE_NAME_HEADER: &str = "x-file-name";

pub struct App {
    pub classifier: Arc<ImageClassifier>,
    pub sessions: SessionStore,
    pub max_upload_bytes: usize,
}

impl App {
    pub fn new(
        classifier: Arc<ImageClassifier>,
        sessions: SessionStore,
        max_upload_bytes: usize,
    ) -> Self {
        App {
            classifier,
            sessions,
            max_upload_bytes,
        }
    }
}

pub async fn handle(req: Request<Body>, app: Arc<App>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/") => index(&req, &app),
        (&Method::POST, "/upload") => upload(req, &app).await,
        (&Method::POST, "/predict") => predict(req, &app).await,
        (&Method::POST, "/api/classify") => classify(req, &app).await,
        _ => text(StatusCode::NOT_FOUND, "Not found".to_owned()),
    };

    info!("{} {} {}", method, path, response.status().as_u16());

    Ok(response)
}

fn session_cookie(req: &Request<Body>) -> Option<Uuid> {
    req.headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(session::parse_cookie)
}

/// Existing session for this request, if any. Never creates one, so
/// cookieless page views cost nothing.
fn existing_session(
    req: &Request<Body>,
    app: &App,
) -> Option<(Uuid, Arc<Mutex<SessionState>>)> {
    app.sessions.get(session_cookie(req))
}

fn index(req: &Request<Body>, app: &App) -> Response<Body> {
    // Copy the state out so the base64 preview is built without the lock.
    let state = existing_session(req, app)
        .map(|(_, state)| session::with(&state, |s| s.clone()))
        .unwrap_or_default();
    let html = page::render(&state);

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(html))
        .unwrap_or_else(|_| internal_error())
}

async fn upload(req: Request<Body>, app: &App) -> Response<Body> {
    let cookie_id = session_cookie(&req);

    let file_name = req
        .headers()
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| urlencoding::decode(v).ok())
        .map(|v| v.into_owned())
        .unwrap_or_default();

    let extension = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if let Err(err) = preprocess::format_for_extension(&extension) {
        return text(StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string());
    }

    let data = match read_body(req, app.max_upload_bytes).await {
        Ok(data) => data,
        Err(response) => return response,
    };

    let (id, state, created) = app.sessions.get_or_create(cookie_id);
    let cookie = created.then(|| session::set_cookie(id));

    info!("Session {}: uploaded {} ({} bytes)", id, file_name, data.len());

    session::with(&state, |state| {
        state.upload(UploadedImage {
            file_name,
            extension,
            data,
        })
    });

    with_cookie(Response::builder().status(StatusCode::NO_CONTENT), cookie)
        .body(Body::empty())
        .unwrap_or_else(|_| internal_error())
}

async fn predict(req: Request<Body>, app: &App) -> Response<Body> {
    let (id, state) = match existing_session(&req, app) {
        Some(session) => session,
        None => return redirect_home(),
    };

    let pending = session::with(&state, |state| {
        state
            .upload
            .as_ref()
            .map(|image| (image.data.clone(), state.generation()))
    });

    let (data, generation) = match pending {
        Some(pending) => pending,
        None => return redirect_home(),
    };

    match run_classifier(&app.classifier, data).await {
        Ok(classification) => {
            let stored = session::with(&state, |state| {
                state.store_result(generation, classification.predictions)
            });
            if !stored {
                info!("Session {}: dropped result for a replaced image", id);
            }
            redirect_home()
        }
        Err(message) => {
            warn!("Session {}: prediction failed: {}", id, message);
            html(StatusCode::UNPROCESSABLE_ENTITY, page::error_page(&message))
        }
    }
}

async fn classify(req: Request<Body>, app: &App) -> Response<Body> {
    let data = match read_body(req, app.max_upload_bytes).await {
        Ok(data) => data,
        Err(response) => return response,
    };

    match run_classifier(&app.classifier, data).await {
        Err(message) => text(
            StatusCode::BAD_REQUEST,
            format!("Classification failure: '{}'", message),
        ),
        Ok(classification) => match serde_json::to_string(&classification) {
            Ok(json) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json))
                .unwrap_or_else(|_| internal_error()),
            Err(err) => {
                error!("Could not serialize classification: {}", err);
                internal_error()
            }
        },
    }
}

/// Run inference off the async executor.
async fn run_classifier(
    classifier: &Arc<ImageClassifier>,
    data: Bytes,
) -> Result<Classification, String> {
    let classifier = Arc::clone(classifier);

    match tokio::task::spawn_blocking(move || classifier.classify_from_raw(&data)).await {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(err) => Err(format!("inference task failed: {}", err)),
    }
}

async fn read_body(req: Request<Body>, limit: usize) -> Result<Bytes, Response<Body>> {
    let too_large = || {
        text(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Uploads are limited to {} bytes", limit),
        )
    };

    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.map_or(false, |len| len > limit) {
        return Err(too_large());
    }

    // Chunked bodies carry no length, so the cap is enforced while reading.
    let mut body = req.into_body();
    let mut data = Vec::with_capacity(declared.unwrap_or_default());
    while let Some(chunk) = body.data().await {
        let chunk = chunk
            .map_err(|err| text(StatusCode::BAD_REQUEST, format!("Could not read body: {}", err)))?;
        if data.len() + chunk.len() > limit {
            return Err(too_large());
        }
        data.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(data))
}

fn with_cookie(
    builder: hyper::http::response::Builder,
    cookie: Option<String>,
) -> hyper::http::response::Builder {
    match cookie {
        Some(cookie) => builder.header(SET_COOKIE, cookie),
        None => builder,
    }
}

fn redirect_home() -> Response<Body> {
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(LOCATION, "/")
        .body(Body::empty())
        .unwrap_or_else(|_| internal_error())
}

fn html(status: StatusCode, page: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(page))
        .unwrap_or_else(|_| internal_error())
}

fn text(status: StatusCode, message: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal server error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
