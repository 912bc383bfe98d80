//! Document evaluation endpoint.
//!
//! `POST /api/evaluate` takes a multipart upload (`file`, `document_type`,
//! optional `timeout_secs`), runs the pipeline on a blocking worker and
//! returns the full evaluation report.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use zeroize::Zeroizing;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::DocumentType;
use crate::pipeline::EvaluationReport;

/// Parsed multipart form.
struct EvaluateForm {
    file: Zeroizing<Vec<u8>>,
    document_type: DocumentType,
    timeout_secs: Option<u64>,
}

/// `POST /api/evaluate`: one document in, one report (with decision) out.
pub async fn evaluate(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<EvaluationReport>, ApiError> {
    let form = read_form(multipart).await?;
    let timeouts = ctx.timeouts(form.timeout_secs).map_err(ApiError::BadRequest)?;

    tracing::info!(
        document_type = %form.document_type,
        size = form.file.len(),
        "Evaluation request received"
    );

    // Both service clients block; keep them off the async workers
    let pipeline = ctx.pipeline.clone();
    let report = tokio::task::spawn_blocking(move || {
        pipeline.process(&form.file, form.document_type, timeouts)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("evaluation worker failed: {e}")))??;

    Ok(Json(report))
}

async fn read_form(mut multipart: Multipart) -> Result<EvaluateForm, ApiError> {
    let mut file: Option<Zeroizing<Vec<u8>>> = None;
    let mut document_type: Option<String> = None;
    let mut timeout_secs: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let mut buf = Zeroizing::new(Vec::new());
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    append_wiped(&mut buf, &chunk);
                }
                file = Some(buf);
            }
            Some("document_type") => {
                document_type = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("timeout_secs") => {
                timeout_secs = Some(field.text().await.map_err(multipart_error)?);
            }
            // Unknown parts are drained and ignored
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadRequest("missing 'file' part".into()))?;
    let document_type = document_type
        .ok_or_else(|| ApiError::BadRequest("missing 'document_type' part".into()))?;
    let document_type =
        DocumentType::from_hint(&document_type).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let timeout_secs = timeout_secs
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ApiError::BadRequest(format!("invalid timeout_secs '{}'", raw.trim())))
        })
        .transpose()?;

    Ok(EvaluateForm {
        file,
        document_type,
        timeout_secs,
    })
}

/// Append without leaving unwiped copies behind: when the buffer must grow,
/// the contents move to a larger zeroizing buffer and the old one is wiped
/// on drop instead of being released by a plain reallocation.
fn append_wiped(buf: &mut Zeroizing<Vec<u8>>, chunk: &[u8]) {
    let needed = buf.len() + chunk.len();
    if needed > buf.capacity() {
        let mut grown = Zeroizing::new(Vec::with_capacity(needed.max(buf.capacity() * 2)));
        grown.extend_from_slice(buf);
        *buf = grown;
    }
    buf.extend_from_slice(chunk);
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}
