use crate::error::ApiError;
use crate::import::resolve::CatalogIndex;
use crate::import::retry::SystemClock;
use crate::import::{ImportSettings, Importer, RawUpload};
use crate::job_controller::state::JobsState;
use crate::store::DocumentStore;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use chrono::{Datelike, Local, Utc};
use common::jobs::JobProgress;
use futures_util::StreamExt;
use log::info;

/// Largest accepted body for a single multipart field, in bytes.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimit(pub usize);

#[derive(Default)]
struct ImportForm {
    file: Option<(Option<String>, Vec<u8>)>,
    year: Option<String>,
    job_id: Option<String>,
    courses: Option<Vec<u8>>,
    sections: Option<Vec<u8>>,
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        bytes.extend_from_slice(&chunk?);
        if bytes.len() > limit {
            return Err(ApiError::PayloadTooLarge {
                limit_mb: limit / (1024 * 1024),
            });
        }
    }
    Ok(bytes)
}

async fn read_text(field: &mut Field, limit: usize) -> Result<String, ApiError> {
    let bytes = read_field(field, limit).await?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

async fn read_form(mut payload: Multipart, limit: usize) -> Result<ImportForm, ApiError> {
    let mut form = ImportForm::default();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));

        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(|f| f.to_string()));
                let bytes = read_field(&mut field, limit).await?;
                form.file = Some((filename, bytes));
            }
            Some("year") => form.year = Some(read_text(&mut field, limit).await?),
            Some("jobId") => form.job_id = Some(read_text(&mut field, limit).await?),
            Some("courses") => form.courses = Some(read_field(&mut field, limit).await?),
            Some("sections") => form.sections = Some(read_field(&mut field, limit).await?),
            _ => {}
        }
    }
    Ok(form)
}

fn parse_year(raw: Option<&str>) -> Result<i32, ApiError> {
    match raw.filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid year \"{}\"", raw))),
        None => Ok(Local::now().year()),
    }
}

pub(crate) async fn process(
    payload: Multipart,
    jobs_state: web::Data<JobsState>,
    store: web::Data<dyn DocumentStore>,
    settings: web::Data<ImportSettings>,
    limit: web::Data<UploadLimit>,
) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload, limit.0).await?;

    let (filename, bytes) = form
        .file
        .ok_or_else(|| ApiError::BadRequest("No file was uploaded".to_string()))?;
    let year = parse_year(form.year.as_deref())?;
    let job_id = form
        .job_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("import-attendance-{}", Utc::now().timestamp_millis()));
    let catalog = CatalogIndex::from_json(form.courses.as_deref(), form.sections.as_deref());

    jobs_state.jobs.write().await.insert(
        job_id.clone(),
        JobProgress::new(&job_id, 0, "Upload received, starting import"),
    );
    info!(
        "Job {} registered: {} bytes, {} catalog entries",
        job_id,
        bytes.len(),
        catalog.len()
    );

    let upload = RawUpload {
        bytes,
        filename,
        year,
        job_id,
    };
    let tx = jobs_state.tx.clone();
    let store = store.into_inner();
    let settings = settings.into_inner();

    // The blocking task is not tied to this future: it completes even if the
    // client goes away and the handler is dropped.
    let summary = tokio::task::spawn_blocking(move || {
        let clock = SystemClock;
        Importer::new(store.as_ref(), &clock, &settings).run(&upload, &catalog, &tx)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::attendance::configure_routes;
    use crate::store::{SqliteStore, ATTENDANCE};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use common::responses::ImportSummary;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const BOUNDARY: &str = "attendance-boundary";

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match filename {
                Some(f) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/csv\r\n\r\n",
                    name, f
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn request(parts: &[(&str, Option<&str>, &[u8])]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/attendance/import")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart(parts))
    }

    struct Harness {
        state: web::Data<JobsState>,
        store: Arc<SqliteStore>,
        // Keeps the progress channel open for the duration of a test.
        _rx: mpsc::Receiver<crate::job_controller::state::JobUpdate>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(1024);
        Harness {
            state: web::Data::new(JobsState::new(tx)),
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            _rx: rx,
        }
    }

    macro_rules! app {
        ($h:expr, $limit:expr) => {{
            let store: Arc<dyn DocumentStore> = $h.store.clone();
            let mut settings = ImportSettings::default();
            settings.commit.pause = std::time::Duration::ZERO;
            test::init_service(
                App::new()
                    .app_data($h.state.clone())
                    .app_data(web::Data::from(store))
                    .app_data(web::Data::new(settings))
                    .app_data(web::Data::new(UploadLimit($limit)))
                    .service(configure_routes()),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn imports_uploaded_csv_with_catalog() {
        let h = harness();
        let app = app!(h, 1024 * 1024);

        let csv = "date,course,section,studentusername,status\n\
                   2024-03-05,1ro Básico,A,jsmith,present\n\
                   2024-03-05,1ro Básico,A,,present\n";
        let courses = r#"[{"id": 1, "name": "1ro Básico"}]"#.as_bytes();
        let sections = r#"[{"id": "sec-001", "courseId": 1, "name": "A"}]"#.as_bytes();
        let req = request(&[
            ("file", Some("attendance.csv"), csv.as_bytes()),
            ("year", None, b"2024".as_slice()),
            ("jobId", None, b"job-42".as_slice()),
            ("courses", None, courses),
            ("sections", None, sections),
        ])
        .to_request();

        let summary: ImportSummary = test::call_and_read_body_json(&app, req).await;
        assert!(summary.success);
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.error_details[0], "Row 2: missing required fields (username/rut)");

        let record = h
            .store
            .get(ATTENDANCE, "2024-03-05-1ro_basico-a-jsmith")
            .unwrap()
            .unwrap();
        assert_eq!(record["sectionId"], "sec-001");
        assert!(h.state.jobs.read().await.contains_key("job-42"));
    }

    #[actix_web::test]
    async fn missing_file_is_a_bad_request() {
        let h = harness();
        let app = app!(h, 1024 * 1024);

        let resp = test::call_service(&app, request(&[("year", None, b"2024".as_slice())]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["details"], "invalid_form");
    }

    #[actix_web::test]
    async fn non_numeric_year_is_rejected() {
        let h = harness();
        let app = app!(h, 1024 * 1024);

        let req = request(&[
            ("file", Some("a.csv"), b"2024-03-05,1ro,A,jsmith,,,present,\n".as_slice()),
            ("year", None, b"next".as_slice()),
        ])
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn empty_file_is_a_bad_request() {
        let h = harness();
        let app = app!(h, 1024 * 1024);

        let req = request(&[("file", Some("a.csv"), b"".as_slice()), ("jobId", None, b"job-empty".as_slice())])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["details"], "empty_file");
    }

    #[actix_web::test]
    async fn oversized_upload_is_refused() {
        let h = harness();
        let app = app!(h, 16);

        let req = request(&[(
            "file",
            Some("a.csv"),
            b"2024-03-05,1ro,A,jsmith,,,present,\n2024-03-06,1ro,A,jsmith,,,present,\n".as_slice(),
        )])
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
