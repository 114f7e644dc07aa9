//! HTTP handlers for folder and file operations under `/files`.
//!
//! Request bodies use camelCase and every field is optional at the serde
//! level: missing fields reach `TreeService`, which reports them as
//! validation errors with one message per operation.

use crate::{
    errors::{AppError, NOT_FOUND},
    middleware::TokenOwner,
    services::tree_service::{Listing, UploadedFile},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListItemsQuery {
    pub folder_id: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateFolderReq {
    pub name: Option<String>,
    pub parent_id: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenameFolderReq {
    pub folder_id: Option<String>,
    pub new_name: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteFolderReq {
    pub folder_id: Option<String>,
    pub owner_id: Option<String>,
    /// Walk the whole subtree instead of cascading one level.
    pub recursive: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveFileReq {
    pub name: Option<String>,
    pub folder_id: Option<String>,
    pub owner_id: Option<String>,
    pub src: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteFileReq {
    pub file_id: Option<String>,
    pub owner_id: Option<String>,
    pub src: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadQuery {
    pub owner_id: Option<String>,
}

/// `GET /files/items?ownerId=&folderId=`
pub async fn list_items(
    State(state): State<AppState>,
    owner: TokenOwner,
    query: Result<Query<ListItemsQuery>, QueryRejection>,
) -> Result<Json<Listing>, AppError> {
    let Query(q) = query?;
    let owner_id = owner.resolve(q.owner_id)?;

    let listing = state
        .tree
        .list_items(&owner_id, q.folder_id.as_deref())
        .await
        .map_err(|e| AppError::from(e).with_collaborator_status(StatusCode::INTERNAL_SERVER_ERROR))?;

    Ok(Json(listing))
}

/// `POST /files/folder`
pub async fn create_folder(
    State(state): State<AppState>,
    owner: TokenOwner,
    payload: Result<Json<CreateFolderReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let owner_id = owner.resolve(req.owner_id)?;

    let folder = state
        .tree
        .create_folder(
            req.name.as_deref().unwrap_or_default(),
            req.parent_id.as_deref(),
            &owner_id,
        )
        .await
        .map_err(|e| AppError::from(e).with_collaborator_status(StatusCode::INTERNAL_SERVER_ERROR))?;

    Ok((StatusCode::CREATED, Json(folder)))
}

/// `PUT /files/folder/rename`
pub async fn rename_folder(
    State(state): State<AppState>,
    owner: TokenOwner,
    payload: Result<Json<RenameFolderReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let owner_id = owner.resolve(req.owner_id)?;

    let folder = state
        .tree
        .rename_folder(
            req.folder_id.as_deref().unwrap_or_default(),
            req.new_name.as_deref().unwrap_or_default(),
            &owner_id,
        )
        .await?;

    Ok(Json(folder))
}

/// `DELETE /files/folder`
pub async fn delete_folder(
    State(state): State<AppState>,
    owner: TokenOwner,
    payload: Result<Json<DeleteFolderReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let owner_id = owner.resolve(req.owner_id)?;

    state
        .tree
        .delete_folder(
            req.folder_id.as_deref().unwrap_or_default(),
            &owner_id,
            req.recursive,
        )
        .await?;

    Ok(Json(json!({ "message": "Folder deleted successfully" })))
}

/// `POST /files/file` — persist metadata for an uploaded payload.
pub async fn save_file_meta(
    State(state): State<AppState>,
    owner: TokenOwner,
    payload: Result<Json<SaveFileReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let owner_id = owner.resolve(req.owner_id)?;

    let file = state
        .tree
        .save_file_meta(
            req.name.as_deref().unwrap_or_default(),
            req.folder_id.as_deref(),
            &owner_id,
            req.src.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(file)))
}

/// `DELETE /files/file`
pub async fn delete_file(
    State(state): State<AppState>,
    owner: TokenOwner,
    payload: Result<Json<DeleteFileReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let owner_id = owner.resolve(req.owner_id)?;

    state
        .tree
        .delete_file(
            req.file_id.as_deref().unwrap_or_default(),
            &owner_id,
            req.src.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok(Json(json!({ "message": "File deleted successfully" })))
}

/// `POST /files/upload` — multipart with a `file` part plus `ownerId` and
/// optional `folderId` text parts. Stores the payload only.
pub async fn upload_file(
    State(state): State<AppState>,
    owner: TokenOwner,
    mut multipart: Multipart,
) -> Result<Json<UploadedFile>, AppError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut owner_id = None;
    let mut folder_id = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                file = Some((filename, field.bytes().await?));
            }
            "ownerId" => owner_id = Some(field.text().await?),
            "folderId" => folder_id = Some(field.text().await?),
            _ => {}
        }
    }

    let (filename, data) = file.ok_or_else(|| AppError::validation("No file uploaded"))?;
    let owner_id = owner.resolve(owner_id)?;

    let uploaded = state
        .tree
        .upload_file(&filename, data, &owner_id, folder_id.as_deref())
        .await
        .map_err(|e| AppError::from(e).with_collaborator_status(StatusCode::INTERNAL_SERVER_ERROR))?;

    Ok(Json(uploaded))
}

/// `GET /files/blob/{*key}?ownerId=` — stream a payload the owner has saved.
pub async fn download_file(
    State(state): State<AppState>,
    owner: TokenOwner,
    Path(key): Path<String>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(q) = query?;
    let owner_id = owner.resolve(q.owner_id)?;

    let (len, reader) = state
        .tree
        .open_blob(&owner_id, &key)
        .await
        .map_err(|e| {
            let err = AppError::from(e);
            if err.code == NOT_FOUND {
                AppError::not_found(err.message)
            } else {
                err.with_collaborator_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        })?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}
