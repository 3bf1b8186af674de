//! HTTP API for bulk attendance imports.
//!
//! - `POST /api/attendance/import`: multipart upload. Fields: `file` (the CSV,
//!   required), `year` (defaults to the current year), `jobId` (defaults to
//!   `import-attendance-<millis>`), and optional `courses` / `sections` JSON
//!   arrays used to resolve section ids. The job is registered as running
//!   before the pipeline starts and the call answers with the import summary
//!   once it finishes. The pipeline keeps going if the client disconnects.
//!
//! - `GET /api/attendance/import/status/{job_id}`: the job's progress
//!   document, from memory or, for jobs of an earlier run, from the
//!   `imports` collection.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod get_status;
mod upload;

pub use upload::UploadLimit;

const API_PATH: &str = "/api/attendance";

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("/import", post().to(upload::process))
        .route("/import/status/{job_id}", get().to(get_status::process))
}
