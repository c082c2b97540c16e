//! # API Endpoint Handlers

use super::{
    AppState,
    types::{
        ErrorResponse, ExportFormat, ExportRequest, ExportResponse, HashResponse, HealthResponse,
        ImportRequest, ImportResponse, NodeQuery, NodeResponse, PropertyJson, StatusResponse,
    },
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use docmerge_core::{
    ContentStore, ErrorKind, MemoryStore, NodeId, VaultError, canonical_crypto_hash,
};

use crate::config::DocmergeConfig;

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// A [`VaultError`] rendered as an HTTP answer.
#[derive(Debug)]
pub struct ApiError(pub VaultError);

impl ApiError {
    /// Malformed documents are the caller's fault, identifier conflicts are
    /// reported as such, everything else is a server error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (VaultError::ItemNotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Parse) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Conflict) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = %status, "request rejected");
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// HEALTH / STATUS / HASH
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let session = state.session.read().await;
    let store = session.store();
    Ok(Json(StatusResponse {
        node_count: store.node_count(),
        policy_count: store.policy_count(),
        namespace_count: store.namespaces().len(),
        checksum: session.checksum()?,
        persistent: session.is_persistent(),
    }))
}

/// BLAKE3 hash of the canonical export.
pub async fn hash_handler(State(state): State<AppState>) -> ApiResult<HashResponse> {
    let session = state.session.read().await;
    Ok(Json(HashResponse {
        algorithm: "blake3".to_string(),
        hash: canonical_crypto_hash(session.store())?,
    }))
}

// =============================================================================
// NODE HANDLER
// =============================================================================

/// Inspect the node at `?path=`.
pub async fn node_handler(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
) -> ApiResult<NodeResponse> {
    let session = state.session.read().await;
    let store = session.store();
    let node = store
        .node_at(&query.path)?
        .ok_or_else(|| VaultError::ItemNotFound(query.path.clone()))?;
    Ok(Json(describe_node(store, node)?))
}

fn describe_node(store: &MemoryStore, node: NodeId) -> Result<NodeResponse, VaultError> {
    let mut children = Vec::new();
    for child in store.children(node)? {
        let name = store.name_of(child)?;
        match store.index_of(child)? {
            0 | 1 => children.push(name),
            index => children.push(format!("{name}[{index}]")),
        }
    }
    Ok(NodeResponse {
        path: store.path_of(node)?,
        primary_type: store.primary_type(node)?,
        mixins: store.mixins(node)?,
        identifier: store.identifier_of(node)?,
        properties: store
            .properties(node)?
            .iter()
            .map(PropertyJson::from)
            .collect(),
        children,
    })
}

// =============================================================================
// IMPORT HANDLER
// =============================================================================

/// Merge a document and commit the tree.
pub async fn import_handler(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<(StatusCode, Json<ImportResponse>), ApiError> {
    if !request.target.starts_with('/') {
        return Err(VaultError::InvalidName(request.target).into());
    }
    let options = request.to_options()?;
    let filter = DocmergeConfig {
        filters: request.filters.clone(),
        ..DocmergeConfig::default()
    }
    .path_filter()?;

    let mut session = state.session.write().await;
    let result = session.import_docview(
        request.document.as_bytes(),
        &request.target,
        &filter,
        options,
    )?;
    session.commit()?;

    let response = ImportResponse::from(&result);
    let status = if response.success {
        StatusCode::OK
    } else {
        // Partially applied: the tree was committed, some paths failed.
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(response)))
}

// =============================================================================
// EXPORT HANDLER
// =============================================================================

pub async fn export_handler(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> ApiResult<ExportResponse> {
    let session = state.session.read().await;
    let checksum = session.checksum()?;
    let response = match request.format {
        ExportFormat::Docview => {
            ExportResponse::docview(session.export_docview(&request.path)?, checksum)
        }
        ExportFormat::Canonical => {
            ExportResponse::canonical(&session.export_canonical()?, checksum)
        }
    };
    Ok(Json(response))
}
