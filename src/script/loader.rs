//! Script source loading

use std::collections::HashSet;
use std::path::Path;

use glob::Pattern;

use super::Script;
use crate::config::{FolderSource, ScriptSources};

/// Load every configured script once. Ignored scripts are dropped; names
/// must be unique across all sources.
pub fn load_scripts(sources: &ScriptSources) -> Result<Vec<Script>, ScriptError> {
    let mut scripts = Vec::new();

    for folder in &sources.folder {
        scripts.extend(load_folder(folder)?);
    }
    for inline in &sources.inline {
        let script = Script::new(&inline.name, &inline.body).parse_meta()?;
        if !script.ignore {
            scripts.push(script);
        }
    }

    let mut seen = HashSet::new();
    for script in &scripts {
        if !seen.insert(script.name.as_str()) {
            return Err(ScriptError::Duplicate(script.name.clone()));
        }
    }

    Ok(scripts)
}

fn load_folder(source: &FolderSource) -> Result<Vec<Script>, ScriptError> {
    let path = &source.path;

    // A single file is always loaded, regardless of mask and @ignore
    if path.is_file() {
        let mut script = load_file(path)?;
        script.ignore = false;
        return Ok(vec![script]);
    }

    let mask = Pattern::new(&source.mask)
        .map_err(|e| ScriptError::Mask(source.mask.clone(), e))?;
    let entries = std::fs::read_dir(path).map_err(|e| ScriptError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ScriptError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let file_path = entry.path();
        let matches = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| mask.matches(n))
            .unwrap_or(false);
        if file_path.is_file() && matches {
            files.push(file_path);
        }
    }
    files.sort();

    let mut scripts = Vec::new();
    for file in files {
        let script = load_file(&file)?;
        if script.ignore {
            tracing::info!(script = %script.name, "Script ignored");
            continue;
        }
        scripts.push(script);
    }

    tracing::debug!(
        source = %source.name,
        count = scripts.len(),
        "Loaded scripts from folder"
    );

    Ok(scripts)
}

fn load_file(path: &Path) -> Result<Script, ScriptError> {
    let body = std::fs::read_to_string(path).map_err(|e| ScriptError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    Script::new(name, body).parse_meta()
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("error read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mask '{0}': {1}")]
    Mask(String, glob::PatternError),

    #[error("script '{script}': {message}")]
    Meta { script: String, message: String },

    #[error("duplicated script name: {0}")]
    Duplicate(String),
}
