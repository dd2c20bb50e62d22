//! Streaming download handler with single-range support.

use crate::{
    errors::AppError,
    handlers::check_content_hash,
    services::file_service::{FileService, StorageError},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub content_hash: String,
    /// When present, the download is counted against this owner's record.
    pub owner: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RangeError {
    Malformed,
    Unsatisfiable,
}

/// Parse a single `bytes=` range against an object of `size` bytes into an
/// inclusive pair. Suffix ranges (`bytes=-n`) and open ends (`bytes=n-`)
/// are supported; multi-range requests are not.
pub(crate) fn parse_range(header: &str, size: u64) -> Result<(u64, u64), RangeError> {
    let spec = header.strip_prefix("bytes=").ok_or(RangeError::Malformed)?;
    if spec.contains(',') {
        return Err(RangeError::Malformed);
    }
    let (start_s, end_s) = spec.split_once('-').ok_or(RangeError::Malformed)?;

    let (start, end) = match (start_s.is_empty(), end_s.is_empty()) {
        // bytes=-n, the final n bytes.
        (true, false) => {
            let n: u64 = end_s.parse().map_err(|_| RangeError::Malformed)?;
            if n == 0 || size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            (size.saturating_sub(n), size - 1)
        }
        // bytes=n-, from n to the end.
        (false, true) => {
            let start: u64 = start_s.parse().map_err(|_| RangeError::Malformed)?;
            if size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            (start, size - 1)
        }
        (false, false) => {
            let start: u64 = start_s.parse().map_err(|_| RangeError::Malformed)?;
            let end: u64 = end_s.parse().map_err(|_| RangeError::Malformed)?;
            (start, end)
        }
        (true, true) => return Err(RangeError::Malformed),
    };

    if start > end || end >= size {
        return Err(RangeError::Unsatisfiable);
    }
    Ok((start, end))
}

/// GET `/api/download?content_hash=...` — stream the object from whichever
/// tier holds it, honoring a single `Range` header.
pub async fn download(
    State(service): State<FileService>,
    Query(q): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let content_hash = check_content_hash(&q.content_hash)?;
    let record = service.resolve_download(&content_hash).await?;
    let size = record.size_bytes.max(0) as u64;

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw) => match parse_range(raw, size) {
            Ok(pair) => Some(pair),
            Err(RangeError::Malformed) => {
                return Err(AppError::invalid_params("malformed Range header"));
            }
            Err(RangeError::Unsatisfiable) => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                return Ok(response);
            }
        },
        None => None,
    };

    let stream = service.open_download(&record, range).await.map_err(|err| {
        // A pointer with no bytes behind it is a server-side inconsistency,
        // but the client just sees a missing file.
        if matches!(
            err,
            StorageError::Tier(crate::services::tiers::TierError::NotFound(_))
        ) {
            AppError::from(StorageError::FileNotFound)
        } else {
            AppError::from(err)
        }
    })?;

    if let Some(owner) = q.owner.as_deref() {
        if !owner.is_empty() {
            service.record_download(owner, &content_hash);
        }
    }

    let mut response = Response::new(Body::from_stream(stream));
    if range.is_some() {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    }

    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{content_hash}\""))
    {
        resp_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    match range {
        Some((start, end)) => {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                resp_headers.insert(header::CONTENT_RANGE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&(end - start + 1).to_string()) {
                resp_headers.insert(header::CONTENT_LENGTH, value);
            }
        }
        None => {
            if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
                resp_headers.insert(header::CONTENT_LENGTH, value);
            }
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_bounded_ranges() {
        assert_eq!(parse_range("bytes=0-9", 10), Ok((0, 9)));
        assert_eq!(parse_range("bytes=2-5", 10), Ok((2, 5)));
    }

    #[test]
    fn open_and_suffix_ranges() {
        assert_eq!(parse_range("bytes=4-", 10), Ok((4, 9)));
        assert_eq!(parse_range("bytes=-3", 10), Ok((7, 9)));
        // Suffix longer than the object means the whole object.
        assert_eq!(parse_range("bytes=-99", 10), Ok((0, 9)));
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(parse_range("bytes=10-", 10), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=5-2", 10), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=0-0", 0), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=-0", 10), Err(RangeError::Unsatisfiable));
    }

    #[test]
    fn end_past_eof_is_unsatisfiable_not_clamped() {
        assert_eq!(parse_range("bytes=2-99", 10), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=0-10", 10), Err(RangeError::Unsatisfiable));
        // The last valid byte is still servable.
        assert_eq!(parse_range("bytes=9-9", 10), Ok((9, 9)));
    }

    #[test]
    fn malformed_ranges() {
        assert_eq!(parse_range("bits=0-1", 10), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=a-b", 10), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=-", 10), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=0-1,3-4", 10), Err(RangeError::Malformed));
    }
}
