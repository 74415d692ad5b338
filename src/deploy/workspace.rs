use super::backend::BackendError;
use crate::generator::GeneratedBundle;
use crate::ids::ProjectId;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Resolve a bundle path to a relative path that cannot leave its root.
pub fn safe_relative(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |source| BackendError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Materialize `bundle` under `<root>/<project>`, replacing anything there.
///
/// Every path is checked before the directory is touched, so a rejected
/// bundle leaves the previous workspace intact.
pub async fn write_workspace(
    root: &Path,
    project: &ProjectId,
    bundle: &GeneratedBundle,
) -> Result<PathBuf, BackendError> {
    let files = bundle
        .files
        .iter()
        .map(|file| {
            safe_relative(&file.path)
                .map(|rel| (rel, file.content.as_bytes()))
                .ok_or_else(|| BackendError::UnsafePath(file.path.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dir = root.join(project.as_str());
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(&dir)(e)),
    }
    tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        tokio::fs::write(&path, content).await.map_err(io_err(&path))?;
    }
    debug!(project = %project, dir = %dir.display(), files = bundle.files.len(), "workspace written");
    Ok(dir)
}
