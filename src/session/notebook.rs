//! Notebook artifact written once at session creation.
//!
//! Each session leaves a single on-disk artifact: an empty notebook document
//! in the session's working directory, removed again at termination. This is
//! the only durable state a session owns.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::{AppError, Result};

/// Write an empty notebook document named `name` under `dir`.
///
/// Creates `dir` (and parents) if needed and returns the artifact path.
///
/// # Errors
///
/// Returns [`AppError::Io`] if the directory or file cannot be written.
pub fn write_empty(dir: &Path, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|err| AppError::Io(format!("failed to create session dir: {err}")))?;

    let path = dir.join(format!("{name}.ipynb"));
    let document = json!({
        "cells": [],
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5,
    });

    let raw = serde_json::to_string_pretty(&document)
        .map_err(|err| AppError::Io(format!("failed to serialise notebook: {err}")))?;
    std::fs::write(&path, raw)
        .map_err(|err| AppError::Io(format!("failed to write notebook: {err}")))?;

    Ok(path)
}

/// Remove the artifact at `path` if it exists.
///
/// Missing files are not an error; termination must be idempotent.
///
/// # Errors
///
/// Returns [`AppError::Io`] if an existing file cannot be removed.
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!("failed to remove notebook: {err}"))),
    }
}
