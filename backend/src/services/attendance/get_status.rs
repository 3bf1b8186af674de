use crate::error::ApiError;
use crate::job_controller::state::JobsState;
use crate::store::{DocumentStore, IMPORTS};
use actix_web::{web, HttpResponse};

pub(crate) async fn process(
    job_id: web::Path<String>,
    state: web::Data<JobsState>,
    store: web::Data<dyn DocumentStore>,
) -> Result<HttpResponse, ApiError> {
    let job_id = job_id.into_inner();
    {
        let jobs = state.jobs.read().await;
        if let Some(progress) = jobs.get(&job_id) {
            return Ok(HttpResponse::Ok().json(progress));
        }
    }

    let store = store.into_inner();
    let id = job_id.clone();
    let stored = web::block(move || store.get(IMPORTS, &id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    match stored {
        Some(progress) => Ok(HttpResponse::Ok().json(progress)),
        None => Err(ApiError::JobNotFound(job_id)),
    }
}
