//! Collaborator-facing services: the folder/file tree, payload storage and
//! the identity provider.

pub mod blob_store;
pub mod identity_service;
pub mod tree_service;
